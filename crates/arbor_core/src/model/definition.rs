//! Record definition (schema registry) model.
//!
//! # Responsibility
//! - Define record schemas, their field specs and library scoping flags.
//! - Provide the field merge used when resolving a derivation chain.
//!
//! # Invariants
//! - `name` is globally unique (enforced by the registry and a DB constraint).
//! - Field keys are unique and non-blank within one schema.
//! - A field key never changes along a derivation chain; descendants may only
//!   override type/label/required/options of an inherited key.

use crate::model::node::ProjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable record definition identifier.
pub type DefinitionId = Uuid;

/// Opaque presentation settings.
pub type Styling = BTreeMap<String, serde_json::Value>;

/// One field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    /// Field value type name (`text`, `number`, `select`, ...). Opaque here.
    #[serde(rename = "type")]
    pub field_type: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn new(
        key: impl Into<String>,
        field_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            field_type: field_type.into(),
            label: label.into(),
            required: false,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }
}

/// Ordered field list of one definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Schema shape violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaValidationError {
    BlankFieldKey { index: usize },
    DuplicateFieldKey(String),
}

impl Display for SchemaValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankFieldKey { index } => write!(f, "field #{index} has a blank key"),
            Self::DuplicateFieldKey(key) => write!(f, "duplicate field key `{key}`"),
        }
    }
}

impl Error for SchemaValidationError {}

impl SchemaConfig {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Checks key presence and uniqueness.
    pub fn validate(&self) -> Result<(), SchemaValidationError> {
        let mut seen = HashSet::new();
        for (index, field) in self.fields.iter().enumerate() {
            if field.key.trim().is_empty() {
                return Err(SchemaValidationError::BlankFieldKey { index });
            }
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaValidationError::DuplicateFieldKey(field.key.clone()));
            }
        }
        Ok(())
    }

    /// Merges schemas ordered root ancestor first.
    ///
    /// Inherited fields keep their first-seen position; a later schema that
    /// repeats a key replaces that field's attributes in place. Keys first seen
    /// in a later schema are appended in that schema's order.
    pub fn merge_chain<'a>(chain: impl IntoIterator<Item = &'a SchemaConfig>) -> SchemaConfig {
        let mut merged: Vec<FieldSpec> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();
        for schema in chain {
            for field in &schema.fields {
                match index_by_key.get(field.key.as_str()) {
                    Some(&index) => merged[index] = field.clone(),
                    None => {
                        index_by_key.insert(field.key.clone(), merged.len());
                        merged.push(field.clone());
                    }
                }
            }
        }
        SchemaConfig { fields: merged }
    }
}

/// Record definition read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub id: DefinitionId,
    pub name: String,
    pub derived_from_id: Option<DefinitionId>,
    pub schema_config: SchemaConfig,
    pub styling: Styling,
    /// `None` means globally shared; otherwise owned by one project library.
    pub project_id: Option<ProjectId>,
    pub is_template: bool,
    /// Never duplicated when the owning project is cloned.
    pub clone_excluded: bool,
    /// UI hint only.
    pub pinned: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Definition {
    pub fn is_shared(&self) -> bool {
        self.project_id.is_none()
    }
}

/// Insert payload for one definition.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDefinition {
    pub id: DefinitionId,
    pub name: String,
    pub derived_from_id: Option<DefinitionId>,
    pub schema_config: SchemaConfig,
    pub styling: Styling,
    pub project_id: Option<ProjectId>,
    pub is_template: bool,
    pub clone_excluded: bool,
    pub pinned: bool,
}

impl NewDefinition {
    /// Creates a shared, non-template payload with a fresh id.
    pub fn new(name: impl Into<String>, schema_config: SchemaConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            derived_from_id: None,
            schema_config,
            styling: Styling::new(),
            project_id: None,
            is_template: false,
            clone_excluded: false,
            pinned: false,
        }
    }

    /// Copies every attribute of `source` except id, name and scope.
    pub fn copy_of(source: &Definition, name: String, project_id: Option<ProjectId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            derived_from_id: source.derived_from_id,
            schema_config: source.schema_config.clone(),
            styling: source.styling.clone(),
            project_id,
            is_template: source.is_template,
            clone_excluded: source.clone_excluded,
            pinned: source.pinned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldSpec, SchemaConfig, SchemaValidationError};

    #[test]
    fn validate_rejects_blank_and_duplicate_keys() {
        let blank = SchemaConfig::new(vec![FieldSpec::new(" ", "text", "Blank")]);
        assert_eq!(
            blank.validate(),
            Err(SchemaValidationError::BlankFieldKey { index: 0 })
        );

        let duplicate = SchemaConfig::new(vec![
            FieldSpec::new("amount", "number", "Amount"),
            FieldSpec::new("amount", "text", "Again"),
        ]);
        assert_eq!(
            duplicate.validate(),
            Err(SchemaValidationError::DuplicateFieldKey("amount".to_string()))
        );
    }

    #[test]
    fn merge_chain_overrides_in_place_and_appends_new_keys() {
        let base = SchemaConfig::new(vec![
            FieldSpec::new("title", "text", "Title"),
            FieldSpec::new("status", "select", "Status").with_options(["open", "done"]),
        ]);
        let child = SchemaConfig::new(vec![
            FieldSpec::new("owner", "user", "Owner"),
            FieldSpec::new("status", "select", "State")
                .required()
                .with_options(["open", "blocked", "done"]),
        ]);

        let merged = SchemaConfig::merge_chain([&base, &child]);
        let keys: Vec<&str> = merged.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["title", "status", "owner"]);
        assert_eq!(merged.fields[1].label, "State");
        assert!(merged.fields[1].required);
        assert_eq!(merged.fields[1].options.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn merge_chain_of_nothing_is_empty() {
        let merged = SchemaConfig::merge_chain(std::iter::empty::<&SchemaConfig>());
        assert!(merged.fields.is_empty());
    }
}
