//! Id remapping for cloned nodes and definitions.
//!
//! # Responsibility
//! - Substitute old entity ids with freshly minted ones across every field
//!   that holds an internal reference.
//! - Decide `created_by` of cloned entities.
//!
//! # Invariants
//! - Pure: no storage access, inputs are never mutated.
//! - References whose target is absent from the map point outside the cloned
//!   scope and are kept verbatim.
//! - `created_by` is never looked up in the map.

use crate::model::definition::Definition;
use crate::model::node::{ActorId, Node};
use std::collections::HashMap;
use uuid::Uuid;

/// Old id -> new id mapping built while cloning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    entries: HashMap<Uuid, Uuid>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a mapping. Returns the previous target, if any.
    pub fn insert(&mut self, old: Uuid, new: Uuid) -> Option<Uuid> {
        self.entries.insert(old, new)
    }

    pub fn get(&self, old: Uuid) -> Option<Uuid> {
        self.entries.get(&old).copied()
    }

    pub fn contains(&self, old: Uuid) -> bool {
        self.entries.contains_key(&old)
    }

    /// Mapped value, or `value` itself when it is out of scope.
    pub fn resolve(&self, value: Uuid) -> Uuid {
        self.get(value).unwrap_or(value)
    }

    pub fn resolve_opt(&self, value: Option<Uuid>) -> Option<Uuid> {
        value.map(|id| self.resolve(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Uuid, Uuid)> + '_ {
        self.entries.iter().map(|(old, new)| (*old, *new))
    }
}

/// Where `created_by` of a cloned entity comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreatedByPolicy {
    /// The actor performing the clone.
    #[default]
    ResetToActor,
    /// The source entity's author.
    PreserveSource,
}

/// Actor identity plus the policy applied to `created_by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorship {
    pub actor: ActorId,
    pub policy: CreatedByPolicy,
}

impl Authorship {
    pub fn new(actor: impl Into<ActorId>, policy: CreatedByPolicy) -> Self {
        Self {
            actor: actor.into(),
            policy,
        }
    }

    pub fn created_by(&self, source: &str) -> ActorId {
        match self.policy {
            CreatedByPolicy::ResetToActor => self.actor.clone(),
            CreatedByPolicy::PreserveSource => source.to_string(),
        }
    }
}

/// Entities whose internal references can be remapped.
pub trait Rewrite {
    /// Returns a copy with every mapped reference substituted.
    fn rewrite(&self, ids: &IdMap, authorship: &Authorship) -> Self;
}

impl Rewrite for Node {
    fn rewrite(&self, ids: &IdMap, authorship: &Authorship) -> Self {
        Node {
            id: ids.resolve(self.id),
            parent_id: ids.resolve_opt(self.parent_id),
            root_project_id: ids.resolve(self.root_project_id),
            default_record_def_id: ids.resolve_opt(self.default_record_def_id),
            created_by: authorship.created_by(&self.created_by),
            ..self.clone()
        }
    }
}

impl Rewrite for Definition {
    fn rewrite(&self, ids: &IdMap, _authorship: &Authorship) -> Self {
        Definition {
            id: ids.resolve(self.id),
            derived_from_id: ids.resolve_opt(self.derived_from_id),
            ..self.clone()
        }
    }
}

/// Free-function form of [`Rewrite::rewrite`].
pub fn rewrite<T: Rewrite>(entity: &T, ids: &IdMap, authorship: &Authorship) -> T {
    entity.rewrite(ids, authorship)
}

#[cfg(test)]
mod tests {
    use super::{rewrite, Authorship, CreatedByPolicy, IdMap};
    use crate::model::definition::{Definition, SchemaConfig, Styling};
    use crate::model::node::{Metadata, Node, NodeType};
    use uuid::Uuid;

    fn stage(parent: Uuid, project: Uuid, definition: Option<Uuid>) -> Node {
        Node {
            id: Uuid::new_v4(),
            parent_id: Some(parent),
            root_project_id: project,
            node_type: NodeType::Stage,
            title: "Review".to_string(),
            description: None,
            position: 3,
            default_record_def_id: definition,
            metadata: Metadata::new(),
            is_template: false,
            created_by: "author".to_string(),
            created_at: 1,
            updated_at: 2,
        }
    }

    #[test]
    fn mapped_references_are_substituted() {
        let (parent, project, definition) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let source = stage(parent, project, Some(definition));
        let mut ids = IdMap::new();
        let new_id = Uuid::new_v4();
        let new_parent = Uuid::new_v4();
        let new_definition = Uuid::new_v4();
        ids.insert(source.id, new_id);
        ids.insert(parent, new_parent);
        ids.insert(definition, new_definition);

        let copy = rewrite(
            &source,
            &ids,
            &Authorship::new("cloner", CreatedByPolicy::ResetToActor),
        );
        assert_eq!(copy.id, new_id);
        assert_eq!(copy.parent_id, Some(new_parent));
        assert_eq!(copy.default_record_def_id, Some(new_definition));
        assert_eq!(copy.title, source.title);
        assert_eq!(copy.position, source.position);
    }

    #[test]
    fn unmapped_references_survive_verbatim() {
        let (parent, project, definition) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let source = stage(parent, project, Some(definition));

        let copy = rewrite(
            &source,
            &IdMap::new(),
            &Authorship::new("cloner", CreatedByPolicy::ResetToActor),
        );
        assert_eq!(copy.parent_id, Some(parent));
        assert_eq!(copy.root_project_id, project);
        assert_eq!(copy.default_record_def_id, Some(definition));
    }

    #[test]
    fn created_by_follows_policy_not_map() {
        let source = stage(Uuid::new_v4(), Uuid::new_v4(), None);
        let ids = IdMap::new();

        let reset = rewrite(&source, &ids, &Authorship::new("cloner", CreatedByPolicy::ResetToActor));
        assert_eq!(reset.created_by, "cloner");

        let kept = rewrite(
            &source,
            &ids,
            &Authorship::new("cloner", CreatedByPolicy::PreserveSource),
        );
        assert_eq!(kept.created_by, "author");
    }

    #[test]
    fn definition_derivation_link_is_remapped() {
        let parent = Uuid::new_v4();
        let source = Definition {
            id: Uuid::new_v4(),
            name: "Invoice".to_string(),
            derived_from_id: Some(parent),
            schema_config: SchemaConfig::default(),
            styling: Styling::new(),
            project_id: None,
            is_template: true,
            clone_excluded: false,
            pinned: false,
            created_at: 0,
            updated_at: 0,
        };
        let mut ids = IdMap::new();
        let new_parent = Uuid::new_v4();
        ids.insert(parent, new_parent);

        let copy = rewrite(
            &source,
            &ids,
            &Authorship::new("cloner", CreatedByPolicy::ResetToActor),
        );
        assert_eq!(copy.id, source.id);
        assert_eq!(copy.derived_from_id, Some(new_parent));
        assert_eq!(copy.name, source.name);
    }
}
