//! Transactional subtree clone.
//!
//! # Responsibility
//! - Plan a depth/template filtered copy of one subtree (phase 1).
//! - Materialize nodes, template definitions and records in one SQLite
//!   transaction (phase 2), rewriting every internal reference.
//!
//! # Invariants
//! - Source and destination project leases are held for the whole run.
//! - Planned nodes are ordered parent-before-child; each is read and written
//!   once.
//! - Any failure or cancellation rolls back every row written by the clone,
//!   including rows written by the record cloner on the same connection.
//! - Overrides apply to the new root only.

use crate::lease::{ProjectLease, ProjectLeases};
use crate::model::definition::{Definition, DefinitionId, NewDefinition};
use crate::model::node::{ActorId, Metadata, NewNode, Node, NodeId, NodeType, ProjectId};
use crate::repo::common::RepoError;
use crate::repo::definition_repo::{DefinitionRepository, SqliteDefinitionRepository};
use crate::repo::node_repo::{NodeRepository, SqliteNodeRepository};
use crate::service::definition_service::{DefinitionService, RegistryError};
use crate::service::reference_rewriter::{Authorship, CreatedByPolicy, IdMap, Rewrite};
use crate::service::tree_service::{TreeError, TreeService};
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Deepest node type included in a clone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloneDepth {
    #[default]
    All,
    Process,
    Stage,
    Subprocess,
}

impl CloneDepth {
    pub fn deepest_type(self) -> NodeType {
        match self {
            Self::All => NodeType::Task,
            Self::Process => NodeType::Process,
            Self::Stage => NodeType::Stage,
            Self::Subprocess => NodeType::Subprocess,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Process => "process",
            Self::Stage => "stage",
            Self::Subprocess => "subprocess",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "process" => Some(Self::Process),
            "stage" => Some(Self::Stage),
            "subprocess" => Some(Self::Subprocess),
            _ => None,
        }
    }
}

/// Content applied to the new root instead of the source's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloneOverrides {
    pub title: Option<String>,
    /// Replaces the source metadata map as a whole.
    pub metadata: Option<Metadata>,
}

/// One clone invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneRequest {
    pub source_node_id: NodeId,
    /// `None` clones a project into a new project.
    pub target_parent_id: Option<NodeId>,
    pub overrides: Option<CloneOverrides>,
    pub depth: CloneDepth,
    pub include_templates: bool,
    pub include_records: bool,
}

impl CloneRequest {
    pub fn new(source_node_id: NodeId) -> Self {
        Self {
            source_node_id,
            target_parent_id: None,
            overrides: None,
            depth: CloneDepth::All,
            include_templates: true,
            include_records: false,
        }
    }

    pub fn under(mut self, target_parent_id: NodeId) -> Self {
        self.target_parent_id = Some(target_parent_id);
        self
    }

    pub fn with_depth(mut self, depth: CloneDepth) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_overrides(mut self, overrides: CloneOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_templates(mut self, include: bool) -> Self {
        self.include_templates = include;
        self
    }

    pub fn with_records(mut self, include: bool) -> Self {
        self.include_records = include;
        self
    }
}

/// Engine-wide clone settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneConfig {
    pub created_by_policy: CreatedByPolicy,
}

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Failure reported by a record cloner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCloneError {
    pub reason: String,
}

impl RecordCloneError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Display for RecordCloneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "record cloning failed: {}", self.reason)
    }
}

impl Error for RecordCloneError {}

/// Collaborator duplicating data records attached to nodes.
///
/// `conn` is the clone transaction; writes made through it commit or roll
/// back together with the cloned nodes.
pub trait RecordCloner: Send + Sync {
    fn clone_records_for_node(
        &self,
        conn: &Connection,
        old_node_id: NodeId,
        new_node_id: NodeId,
        node_ids: &IdMap,
    ) -> Result<(), RecordCloneError>;
}

/// Record cloner for deployments without record storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecordCloner;

impl RecordCloner for NoopRecordCloner {
    fn clone_records_for_node(
        &self,
        _conn: &Connection,
        _old_node_id: NodeId,
        _new_node_id: NodeId,
        _node_ids: &IdMap,
    ) -> Result<(), RecordCloneError> {
        Ok(())
    }
}

/// What happens to one referenced definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionAction {
    /// Copied once into the destination library; nodes point at the copy.
    Duplicate,
    /// Clone-excluded template: cloned nodes get no default definition.
    Detach,
    /// Outside the clone scope: reference kept verbatim.
    Keep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDefinition {
    pub source: Definition,
    pub action: DefinitionAction,
}

/// Phase-1 result.
#[derive(Debug, Clone, PartialEq)]
pub struct ClonePlan {
    /// Source nodes in parent-before-child order; the first is the root.
    pub nodes: Vec<Node>,
    /// Distinct referenced definitions in first-reference order.
    pub definitions: Vec<PlannedDefinition>,
    pub target_parent: Option<Node>,
}

impl ClonePlan {
    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn duplicated_definitions(&self) -> impl Iterator<Item = &Definition> + '_ {
        self.definitions
            .iter()
            .filter(|planned| planned.action == DefinitionAction::Duplicate)
            .map(|planned| &planned.source)
    }
}

/// Committed clone result.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneOutcome {
    pub root: Node,
    /// Source node id -> cloned node id.
    pub node_ids: IdMap,
    /// Source definition id -> duplicated definition id.
    pub definition_ids: IdMap,
}

/// Errors from clone operations.
#[derive(Debug)]
pub enum CloneError {
    /// Source node does not exist.
    NodeNotFound(NodeId),
    /// Target parent does not exist.
    ParentNotFound(NodeId),
    /// Target parent lies inside the source subtree.
    CycleDetected { node_id: NodeId, parent_id: NodeId },
    /// Source root type cannot sit under the target parent type.
    InvalidHierarchy {
        node_id: NodeId,
        node_type: NodeType,
        parent_type: Option<NodeType>,
    },
    /// Clone stopped and rolled back; the reason is human readable.
    Aborted(String),
    /// Tree store failure while materializing.
    Tree(TreeError),
    /// Registry failure while duplicating definitions.
    Registry(RegistryError),
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for CloneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "clone source not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "clone target parent not found: {id}"),
            Self::CycleDetected { node_id, parent_id } => write!(
                f,
                "cycle detected: cannot clone node {node_id} under its descendant {parent_id}"
            ),
            Self::InvalidHierarchy {
                node_id,
                node_type,
                parent_type: Some(parent_type),
            } => write!(
                f,
                "invalid hierarchy: {node_type} node {node_id} cannot be cloned under a {parent_type}"
            ),
            Self::InvalidHierarchy {
                node_id,
                node_type,
                parent_type: None,
            } => write!(
                f,
                "invalid hierarchy: {node_type} node {node_id} needs a target parent"
            ),
            Self::Aborted(reason) => write!(f, "clone aborted: {reason}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CloneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Tree(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TreeError> for CloneError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::CycleDetected { node_id, parent_id } => {
                Self::CycleDetected { node_id, parent_id }
            }
            TreeError::InvalidHierarchy {
                node_id,
                node_type,
                parent_type,
            } => Self::InvalidHierarchy {
                node_id,
                node_type,
                parent_type,
            },
            other => Self::Tree(other),
        }
    }
}

impl From<RegistryError> for CloneError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<RepoError> for CloneError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for CloneError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl CloneError {
    fn kind(&self) -> &'static str {
        match self {
            Self::NodeNotFound(_) => "node_not_found",
            Self::ParentNotFound(_) => "parent_not_found",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::InvalidHierarchy { .. } => "invalid_hierarchy",
            Self::Aborted(_) => "aborted",
            Self::Tree(_) => "tree",
            Self::Registry(_) => "registry",
            Self::Repo(_) => "repo",
        }
    }
}

/// Clone engine bound to one connection.
///
/// Each thread should own its connection; the lease registry is shared.
pub struct CloneService<'conn> {
    conn: &'conn Connection,
    leases: Arc<ProjectLeases>,
    config: CloneConfig,
    record_cloner: Arc<dyn RecordCloner>,
}

impl<'conn> CloneService<'conn> {
    pub fn new(conn: &'conn Connection, leases: Arc<ProjectLeases>) -> Self {
        Self {
            conn,
            leases,
            config: CloneConfig::default(),
            record_cloner: Arc::new(NoopRecordCloner),
        }
    }

    pub fn with_config(mut self, config: CloneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_record_cloner(mut self, record_cloner: Arc<dyn RecordCloner>) -> Self {
        self.record_cloner = record_cloner;
        self
    }

    /// Runs phase 1 only, without leases or writes.
    pub fn plan_clone(&self, request: &CloneRequest) -> Result<ClonePlan, CloneError> {
        let nodes = SqliteNodeRepository::try_new(self.conn)?;
        let definitions = SqliteDefinitionRepository::try_new(self.conn)?;
        let target_parent = load_target_parent(&nodes, request.target_parent_id)?;
        let destination = target_parent.as_ref().map(|parent| parent.root_project_id);
        build_plan(&nodes, &definitions, request, target_parent, destination)
    }

    /// Clones `request.source_node_id` and returns the committed result.
    ///
    /// # Errors
    /// - `CycleDetected` / `InvalidHierarchy` when the attach point is illegal.
    /// - `Aborted` on cancellation, record-cloner failure, or a source root
    ///   deeper than `request.depth`.
    /// - Every error leaves the store unchanged.
    pub fn clone_subtree(
        &self,
        request: &CloneRequest,
        actor: &str,
        cancel: &CancelToken,
    ) -> Result<CloneOutcome, CloneError> {
        let started_at = Instant::now();
        info!(
            "event=clone_subtree module=clone status=start source_node_id={} depth={} include_templates={} include_records={}",
            request.source_node_id,
            request.depth.as_str(),
            request.include_templates,
            request.include_records
        );

        let result = self.run(request, actor.to_string(), cancel);
        match &result {
            Ok(outcome) => info!(
                "event=clone_subtree module=clone status=ok source_node_id={} new_root_id={} nodes={} definitions={} duration_ms={}",
                request.source_node_id,
                outcome.root.id,
                outcome.node_ids.len(),
                outcome.definition_ids.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=clone_subtree module=clone status=error source_node_id={} duration_ms={} error_kind={} error={}",
                request.source_node_id,
                started_at.elapsed().as_millis(),
                err.kind(),
                err
            ),
        }
        result
    }

    fn run(
        &self,
        request: &CloneRequest,
        actor: ActorId,
        cancel: &CancelToken,
    ) -> Result<CloneOutcome, CloneError> {
        let new_root_id = Uuid::new_v4();
        let lease = self.acquire_lease(request, new_root_id)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let outcome = {
            let nodes = SqliteNodeRepository::try_new(&tx)?;
            let definitions = SqliteDefinitionRepository::try_new(&tx)?;
            let target_parent = load_target_parent(&nodes, request.target_parent_id)?;
            let destination = target_parent
                .as_ref()
                .map_or(new_root_id, |parent| parent.root_project_id);
            let plan = build_plan(
                &nodes,
                &definitions,
                request,
                target_parent,
                Some(destination),
            )?;
            debug!(
                "event=clone_plan module=clone status=ok nodes={} definitions={}",
                plan.nodes.len(),
                plan.definitions.len()
            );

            let materializer = Materializer {
                conn: &tx,
                tree: TreeService::new(nodes, Arc::clone(&self.leases)),
                registry: DefinitionService::new(definitions),
                lease: &lease,
                authorship: Authorship::new(actor, self.config.created_by_policy),
                record_cloner: self.record_cloner.as_ref(),
                cancel,
            };
            materializer.run(plan, request, new_root_id, destination)?
        };
        ensure_not_cancelled(cancel)?;
        tx.commit()?;
        drop(lease);
        Ok(outcome)
    }

    /// Holds source and destination project leases, re-reading until the
    /// leased set still matches both nodes' projects.
    fn acquire_lease(
        &self,
        request: &CloneRequest,
        new_root_id: NodeId,
    ) -> Result<ProjectLease<'_>, CloneError> {
        let nodes = SqliteNodeRepository::try_new(self.conn)?;
        loop {
            let before = affected_projects(&nodes, request, new_root_id)?;
            let lease = self.leases.acquire(&before);
            let after = affected_projects(&nodes, request, new_root_id)?;
            if after.iter().all(|project_id| lease.covers(*project_id)) {
                return Ok(lease);
            }
        }
    }
}

/// Source project and destination project of a clone request.
fn affected_projects<R: NodeRepository>(
    nodes: &R,
    request: &CloneRequest,
    new_root_id: NodeId,
) -> Result<[ProjectId; 2], CloneError> {
    let source = nodes
        .get_node(request.source_node_id)?
        .ok_or(CloneError::NodeNotFound(request.source_node_id))?;
    let destination = match load_target_parent(nodes, request.target_parent_id)? {
        Some(parent) => parent.root_project_id,
        None => new_root_id,
    };
    Ok([source.root_project_id, destination])
}

struct Materializer<'a, 'tx> {
    conn: &'tx Connection,
    tree: TreeService<SqliteNodeRepository<'tx>>,
    registry: DefinitionService<SqliteDefinitionRepository<'tx>>,
    lease: &'a ProjectLease<'a>,
    authorship: Authorship,
    record_cloner: &'a dyn RecordCloner,
    cancel: &'a CancelToken,
}

impl Materializer<'_, '_> {
    fn run(
        &self,
        plan: ClonePlan,
        request: &CloneRequest,
        new_root_id: NodeId,
        destination: ProjectId,
    ) -> Result<CloneOutcome, CloneError> {
        let root = plan
            .root()
            .ok_or(CloneError::NodeNotFound(request.source_node_id))?;
        self.validate_attach_point(root, plan.target_parent.as_ref())?;
        ensure_not_cancelled(self.cancel)?;

        let definition_ids = self.duplicate_definitions(&plan, destination)?;
        let detached: HashSet<DefinitionId> = plan
            .definitions
            .iter()
            .filter(|planned| planned.action == DefinitionAction::Detach)
            .map(|planned| planned.source.id)
            .collect();

        let mut ids = definition_ids.clone();
        let mut node_ids = IdMap::new();
        let target_parent_id = plan.target_parent.as_ref().map(|parent| parent.id);
        let mut created_root = None;
        for (index, source) in plan.nodes.iter().enumerate() {
            ensure_not_cancelled(self.cancel)?;
            let is_root = index == 0;
            let new_id = if is_root { new_root_id } else { Uuid::new_v4() };
            ids.insert(source.id, new_id);
            node_ids.insert(source.id, new_id);

            let mut copy = source.rewrite(&ids, &self.authorship);
            copy.default_record_def_id = copy
                .default_record_def_id
                .filter(|definition_id| !detached.contains(definition_id));
            let mut new_node = NewNode::from(copy);
            if is_root {
                new_node.parent_id = target_parent_id;
                new_node.position = None;
                if let Some(overrides) = &request.overrides {
                    if let Some(title) = &overrides.title {
                        new_node.title = title.clone();
                    }
                    if let Some(metadata) = &overrides.metadata {
                        new_node.metadata = metadata.clone();
                    }
                }
            }

            let created = self.tree.create_node_leased(self.lease, new_node)?;
            if is_root {
                created_root = Some(created);
            }
        }

        if request.include_records {
            for source in &plan.nodes {
                ensure_not_cancelled(self.cancel)?;
                let new_id = node_ids.resolve(source.id);
                self.record_cloner
                    .clone_records_for_node(self.conn, source.id, new_id, &node_ids)
                    .map_err(|err| {
                        CloneError::Aborted(format!("node {}: {err}", source.id))
                    })?;
            }
        }

        let root = created_root.ok_or(CloneError::NodeNotFound(request.source_node_id))?;
        Ok(CloneOutcome {
            root,
            node_ids,
            definition_ids,
        })
    }

    fn validate_attach_point(
        &self,
        root: &Node,
        target_parent: Option<&Node>,
    ) -> Result<(), CloneError> {
        if let Some(parent) = target_parent {
            if self.tree.is_within_subtree(root.id, parent.id)? {
                return Err(CloneError::CycleDetected {
                    node_id: root.id,
                    parent_id: parent.id,
                });
            }
        }
        let parent_type = target_parent.map(|parent| parent.node_type);
        if !root.node_type.can_attach_to(parent_type) {
            return Err(CloneError::InvalidHierarchy {
                node_id: root.id,
                node_type: root.node_type,
                parent_type,
            });
        }
        Ok(())
    }

    /// Copies every `Duplicate` definition into the destination library.
    ///
    /// Copy ids are minted up front so derivation links between copies
    /// resolve regardless of insert order.
    fn duplicate_definitions(
        &self,
        plan: &ClonePlan,
        destination: ProjectId,
    ) -> Result<IdMap, CloneError> {
        let mut definition_ids = IdMap::new();
        for source in plan.duplicated_definitions() {
            definition_ids.insert(source.id, Uuid::new_v4());
        }
        for source in plan.duplicated_definitions() {
            ensure_not_cancelled(self.cancel)?;
            let rewritten = source.rewrite(&definition_ids, &self.authorship);
            let mut copy =
                NewDefinition::copy_of(&rewritten, rewritten.name.clone(), Some(destination));
            copy.id = rewritten.id;
            self.registry.insert_library_copy(copy)?;
        }
        Ok(definition_ids)
    }
}

fn load_target_parent<R: NodeRepository>(
    nodes: &R,
    target_parent_id: Option<NodeId>,
) -> Result<Option<Node>, CloneError> {
    match target_parent_id {
        Some(parent_id) => nodes
            .get_node(parent_id)?
            .map(Some)
            .ok_or(CloneError::ParentNotFound(parent_id)),
        None => Ok(None),
    }
}

/// Phase 1: pre-order walk pruned by depth and template filter.
///
/// `destination` is `None` when planning without a known destination project;
/// template definitions are then always planned for duplication.
fn build_plan<N: NodeRepository, D: DefinitionRepository>(
    nodes: &N,
    definitions: &D,
    request: &CloneRequest,
    target_parent: Option<Node>,
    destination: Option<ProjectId>,
) -> Result<ClonePlan, CloneError> {
    let root = nodes
        .get_node(request.source_node_id)?
        .ok_or(CloneError::NodeNotFound(request.source_node_id))?;
    let deepest = request.depth.deepest_type();
    if root.node_type.level() > deepest.level() {
        return Err(CloneError::Aborted(format!(
            "source node {} is a {}, below clone depth {}",
            root.id,
            root.node_type,
            request.depth.as_str()
        )));
    }

    let mut planned_nodes = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.node_type.level() < deepest.level() {
            let children = nodes.list_children(node.id)?;
            stack.extend(
                children
                    .into_iter()
                    .rev()
                    .filter(|child| request.include_templates || !child.is_template),
            );
        }
        planned_nodes.push(node);
    }

    let mut seen = HashSet::new();
    let mut planned_definitions = Vec::new();
    for node in &planned_nodes {
        let Some(definition_id) = node.default_record_def_id else {
            continue;
        };
        if !seen.insert(definition_id) {
            continue;
        }
        let source = definitions
            .get_definition(definition_id)?
            .ok_or(CloneError::Registry(RegistryError::DefinitionNotFound(
                definition_id,
            )))?;
        let action = definition_action(&source, request.include_templates, destination);
        planned_definitions.push(PlannedDefinition { source, action });
    }

    Ok(ClonePlan {
        nodes: planned_nodes,
        definitions: planned_definitions,
        target_parent,
    })
}

fn definition_action(
    definition: &Definition,
    include_templates: bool,
    destination: Option<ProjectId>,
) -> DefinitionAction {
    if definition.clone_excluded {
        return DefinitionAction::Detach;
    }
    if !definition.is_template || !include_templates {
        return DefinitionAction::Keep;
    }
    match (definition.project_id, destination) {
        (Some(owner), Some(destination)) if owner == destination => DefinitionAction::Keep,
        _ => DefinitionAction::Duplicate,
    }
}

fn ensure_not_cancelled(cancel: &CancelToken) -> Result<(), CloneError> {
    if cancel.is_cancelled() {
        return Err(CloneError::Aborted("cancelled".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{definition_action, CancelToken, CloneDepth, CloneRequest, DefinitionAction};
    use crate::model::definition::{Definition, SchemaConfig, Styling};
    use crate::model::node::NodeType;
    use uuid::Uuid;

    fn template(project_id: Option<Uuid>, clone_excluded: bool) -> Definition {
        Definition {
            id: Uuid::new_v4(),
            name: "Checklist".to_string(),
            derived_from_id: None,
            schema_config: SchemaConfig::default(),
            styling: Styling::new(),
            project_id,
            is_template: true,
            clone_excluded,
            pinned: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn request_defaults_clone_everything_but_records() {
        let request = CloneRequest::new(Uuid::new_v4());
        assert_eq!(request.depth, CloneDepth::All);
        assert!(request.include_templates);
        assert!(!request.include_records);
        assert!(request.target_parent_id.is_none());
        assert!(request.overrides.is_none());
    }

    #[test]
    fn depth_names_the_deepest_included_type() {
        assert_eq!(CloneDepth::All.deepest_type(), NodeType::Task);
        assert_eq!(CloneDepth::Stage.deepest_type(), NodeType::Stage);
        for depth in [
            CloneDepth::All,
            CloneDepth::Process,
            CloneDepth::Stage,
            CloneDepth::Subprocess,
        ] {
            assert_eq!(CloneDepth::parse(depth.as_str()), Some(depth));
        }
        assert_eq!(CloneDepth::parse("task"), None);
    }

    #[test]
    fn definition_actions_follow_template_flags() {
        let source_project = Uuid::new_v4();
        let destination = Uuid::new_v4();

        let scoped = template(Some(source_project), false);
        assert_eq!(
            definition_action(&scoped, true, Some(destination)),
            DefinitionAction::Duplicate
        );
        assert_eq!(
            definition_action(&scoped, false, Some(destination)),
            DefinitionAction::Keep
        );
        assert_eq!(
            definition_action(&scoped, true, Some(source_project)),
            DefinitionAction::Keep
        );

        let excluded = template(Some(source_project), true);
        assert_eq!(
            definition_action(&excluded, true, Some(destination)),
            DefinitionAction::Detach
        );
        assert_eq!(
            definition_action(&excluded, false, Some(destination)),
            DefinitionAction::Detach
        );
        assert_eq!(
            definition_action(&excluded, true, Some(source_project)),
            DefinitionAction::Detach
        );

        let mut shared = template(None, false);
        shared.is_template = false;
        assert_eq!(
            definition_action(&shared, true, Some(destination)),
            DefinitionAction::Keep
        );
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
