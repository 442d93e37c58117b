//! Record definition registry service.
//!
//! # Responsibility
//! - Create, scope and delete record definitions.
//! - Resolve schemas along `derived_from_id` chains.
//! - Maintain per-project template libraries without mutating shared
//!   definitions other consumers depend on.
//!
//! # Invariants
//! - Names are trimmed, non-blank and globally unique.
//! - Derivation chains terminate: every walk is cycle-checked and bounded by
//!   `MAX_DERIVATION_DEPTH`.
//! - A definition referenced by any node cannot be deleted.

use crate::model::definition::{
    Definition, DefinitionId, NewDefinition, SchemaConfig, SchemaValidationError,
};
use crate::model::node::ProjectId;
use crate::repo::common::RepoError;
use crate::repo::definition_repo::{DefinitionFlag, DefinitionRepository};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound on derivation chain length.
pub const MAX_DERIVATION_DEPTH: usize = 64;

static COPY_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<stem>.+?) \(copy(?: (?P<n>\d+))?\)$").expect("valid copy suffix regex")
});

/// Errors from registry operations.
#[derive(Debug)]
pub enum RegistryError {
    /// Name of this definition is blank after trim.
    InvalidName(DefinitionId),
    /// Field list is malformed.
    InvalidSchema(SchemaValidationError),
    /// Another definition already uses this name.
    NameConflict(String),
    /// Target definition does not exist.
    DefinitionNotFound(DefinitionId),
    /// Following `derived_from_id` from this definition never terminates.
    DerivationCycle(DefinitionId),
    /// Nodes still point at the definition through `default_record_def_id`.
    ReferencedByNodes {
        definition_id: DefinitionId,
        node_count: i64,
    },
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(id) => write!(f, "name of definition {id} must not be blank"),
            Self::InvalidSchema(err) => write!(f, "invalid schema: {err}"),
            Self::NameConflict(name) => write!(f, "definition name already in use: `{name}`"),
            Self::DefinitionNotFound(id) => write!(f, "definition not found: {id}"),
            Self::DerivationCycle(id) => {
                write!(f, "derivation chain of definition {id} does not terminate")
            }
            Self::ReferencedByNodes {
                definition_id,
                node_count,
            } => write!(
                f,
                "definition {definition_id} is still referenced by {node_count} node(s)"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidSchema(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for RegistryError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::DefinitionNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<SchemaValidationError> for RegistryError {
    fn from(value: SchemaValidationError) -> Self {
        Self::InvalidSchema(value)
    }
}

/// Definition registry facade over a definition repository.
pub struct DefinitionService<R: DefinitionRepository> {
    repo: R,
}

impl<R: DefinitionRepository> DefinitionService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates one definition.
    ///
    /// # Errors
    /// - `NameConflict` when the trimmed name is taken.
    /// - `DefinitionNotFound` when `derived_from_id` is unknown.
    /// - `DerivationCycle` when the parent's own chain does not terminate.
    pub fn create_definition(
        &self,
        mut definition: NewDefinition,
    ) -> Result<Definition, RegistryError> {
        definition.name = normalize_name(definition.id, &definition.name)?;
        definition.schema_config.validate()?;
        if self.repo.find_by_name(&definition.name)?.is_some() {
            return Err(RegistryError::NameConflict(definition.name));
        }
        if let Some(parent_id) = definition.derived_from_id {
            self.ancestry(parent_id)?;
        }

        let created = self.repo.insert_definition(&definition)?;
        info!(
            "event=definition_create module=registry status=ok definition_id={} derived={} scoped={}",
            created.id,
            created.derived_from_id.is_some(),
            created.project_id.is_some()
        );
        Ok(created)
    }

    pub fn get_definition(&self, id: DefinitionId) -> Result<Option<Definition>, RegistryError> {
        self.repo.get_definition(id).map_err(Into::into)
    }

    /// Loads one definition or fails with `DefinitionNotFound`.
    pub fn require_definition(&self, id: DefinitionId) -> Result<Definition, RegistryError> {
        self.repo
            .get_definition(id)?
            .ok_or(RegistryError::DefinitionNotFound(id))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Definition>, RegistryError> {
        self.repo.find_by_name(name.trim()).map_err(Into::into)
    }

    /// Lists template definitions in one project's library.
    pub fn list_library(&self, project_id: ProjectId) -> Result<Vec<Definition>, RegistryError> {
        self.repo.list_library(project_id).map_err(Into::into)
    }

    /// Returns the merged field list of `id` and all its ancestors.
    ///
    /// Ancestor fields come first in their original order; a descendant field
    /// with the same key overrides type/label/required/options in place;
    /// descendant-only keys are appended.
    pub fn resolve_inherited_schema(&self, id: DefinitionId) -> Result<SchemaConfig, RegistryError> {
        let mut chain = self.ancestry(id)?;
        chain.reverse();
        Ok(SchemaConfig::merge_chain(
            chain.iter().map(|definition| &definition.schema_config),
        ))
    }

    /// Re-points the derivation parent of `id`.
    pub fn set_derived_from(
        &self,
        id: DefinitionId,
        derived_from_id: Option<DefinitionId>,
    ) -> Result<Definition, RegistryError> {
        self.require_definition(id)?;
        if let Some(parent_id) = derived_from_id {
            let parents = self.ancestry(parent_id)?;
            if parents.iter().any(|definition| definition.id == id) {
                return Err(RegistryError::DerivationCycle(id));
            }
        }
        self.repo
            .set_derived_from(id, derived_from_id)
            .map_err(Into::into)
    }

    /// Adds a definition to a project's template library.
    ///
    /// # Contract
    /// - Shared definition used by nodes outside `project_id`: a scoped copy
    ///   is created and returned; the shared one is untouched.
    /// - Shared definition not used elsewhere: scoped in place.
    /// - Already scoped to `project_id`: marked as template in place.
    /// - Scoped to another project: copied, the other library keeps its own.
    pub fn save_to_library(
        &self,
        id: DefinitionId,
        project_id: ProjectId,
    ) -> Result<Definition, RegistryError> {
        let definition = self.require_definition(id)?;
        let saved = match definition.project_id {
            Some(owner) if owner == project_id => {
                self.repo.set_library_scope(id, Some(project_id), true)?
            }
            Some(_) => self.copy_into_library(&definition, project_id)?,
            None => {
                if self.repo.count_node_references(id, Some(project_id))? > 0 {
                    self.copy_into_library(&definition, project_id)?
                } else {
                    self.repo.set_library_scope(id, Some(project_id), true)?
                }
            }
        };
        info!(
            "event=library_save module=registry status=ok definition_id={} saved_id={} project_id={} copied={}",
            id,
            saved.id,
            project_id,
            saved.id != id
        );
        Ok(saved)
    }

    /// Returns a definition to the shared pool.
    pub fn remove_from_library(&self, id: DefinitionId) -> Result<Definition, RegistryError> {
        let removed = self.repo.set_library_scope(id, None, false)?;
        info!("event=library_remove module=registry status=ok definition_id={id}");
        Ok(removed)
    }

    pub fn toggle_clone_excluded(
        &self,
        id: DefinitionId,
        excluded: bool,
    ) -> Result<Definition, RegistryError> {
        self.repo
            .set_flag(id, DefinitionFlag::CloneExcluded, excluded)
            .map_err(Into::into)
    }

    pub fn set_pinned(&self, id: DefinitionId, pinned: bool) -> Result<Definition, RegistryError> {
        self.repo
            .set_flag(id, DefinitionFlag::Pinned, pinned)
            .map_err(Into::into)
    }

    /// Deletes a definition no node references.
    pub fn delete_definition(&self, id: DefinitionId) -> Result<(), RegistryError> {
        self.require_definition(id)?;
        let node_count = self.repo.count_node_references(id, None)?;
        if node_count > 0 {
            return Err(RegistryError::ReferencedByNodes {
                definition_id: id,
                node_count,
            });
        }
        self.repo.delete_definition(id)?;
        info!("event=definition_delete module=registry status=ok definition_id={id}");
        Ok(())
    }

    /// Copies `id` into `project_id`'s library under a fresh unique name.
    pub fn duplicate_into_library(
        &self,
        id: DefinitionId,
        project_id: ProjectId,
    ) -> Result<Definition, RegistryError> {
        let source = self.require_definition(id)?;
        self.copy_into_library(&source, project_id)
    }

    /// Inserts a prepared copy, replacing its name with the next free
    /// `"<stem> (copy N)"` variant.
    pub fn insert_library_copy(
        &self,
        mut copy: NewDefinition,
    ) -> Result<Definition, RegistryError> {
        copy.name = self.unique_copy_name(copy.id, &copy.name)?;
        copy.schema_config.validate()?;
        let created = self.repo.insert_definition(&copy)?;
        info!(
            "event=definition_copy module=registry status=ok definition_id={} project_id={}",
            created.id,
            created
                .project_id
                .map_or_else(|| "shared".to_string(), |value| value.to_string())
        );
        Ok(created)
    }

    fn copy_into_library(
        &self,
        source: &Definition,
        project_id: ProjectId,
    ) -> Result<Definition, RegistryError> {
        let mut copy = NewDefinition::copy_of(source, source.name.clone(), Some(project_id));
        copy.is_template = true;
        self.insert_library_copy(copy)
    }

    /// Returns `id` followed by its ancestors, nearest first.
    fn ancestry(&self, id: DefinitionId) -> Result<Vec<Definition>, RegistryError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !visited.insert(current) || chain.len() >= MAX_DERIVATION_DEPTH {
                return Err(RegistryError::DerivationCycle(id));
            }
            let definition = self.require_definition(current)?;
            cursor = definition.derived_from_id;
            chain.push(definition);
        }
        Ok(chain)
    }

    fn unique_copy_name(&self, id: DefinitionId, name: &str) -> Result<String, RegistryError> {
        let name = normalize_name(id, name)?;
        let stem = COPY_SUFFIX_RE
            .captures(&name)
            .and_then(|captures| captures.name("stem"))
            .map_or(name.as_str(), |stem| stem.as_str())
            .to_string();

        let taken: HashSet<String> = self
            .repo
            .list_names_with_prefix(&format!("{stem} (copy"))?
            .into_iter()
            .collect();
        let mut candidate = format!("{stem} (copy)");
        let mut counter = 2;
        while taken.contains(&candidate) {
            candidate = format!("{stem} (copy {counter})");
            counter += 1;
        }
        Ok(candidate)
    }
}

fn normalize_name(id: DefinitionId, value: &str) -> Result<String, RegistryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidName(id));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::COPY_SUFFIX_RE;

    #[test]
    fn copy_suffix_regex_extracts_stem() {
        let plain = COPY_SUFFIX_RE.captures("Invoice (copy)").unwrap();
        assert_eq!(&plain["stem"], "Invoice");
        assert!(plain.name("n").is_none());

        let numbered = COPY_SUFFIX_RE.captures("Invoice (copy 12)").unwrap();
        assert_eq!(&numbered["stem"], "Invoice");
        assert_eq!(&numbered["n"], "12");

        assert!(COPY_SUFFIX_RE.captures("Invoice").is_none());
    }
}
