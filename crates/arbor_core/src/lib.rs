//! Core domain logic for Arbor project hierarchies.
//! This crate is the single source of truth for hierarchy and registry invariants.

pub mod db;
pub mod lease;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError};
pub use lease::{ProjectLease, ProjectLeases};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::definition::{
    Definition, DefinitionId, FieldSpec, NewDefinition, SchemaConfig, SchemaValidationError,
};
pub use model::node::{ActorId, Metadata, NewNode, Node, NodeId, NodePatch, NodeType, ProjectId};
pub use repo::common::{RepoError, RepoResult};
pub use repo::definition_repo::{DefinitionRepository, SqliteDefinitionRepository};
pub use repo::node_repo::{NodeRepository, SqliteNodeRepository};
pub use service::clone_service::{
    CancelToken, CloneConfig, CloneDepth, CloneError, CloneOutcome, CloneOverrides, ClonePlan,
    CloneRequest, CloneService, NoopRecordCloner, RecordCloneError, RecordCloner,
};
pub use service::definition_service::{DefinitionService, RegistryError, MAX_DERIVATION_DEPTH};
pub use service::reference_rewriter::{rewrite, Authorship, CreatedByPolicy, IdMap, Rewrite};
pub use service::tree_service::{NodeCleanupHook, Subtree, TreeError, TreeService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
