//! Hierarchy tree use-case service.
//!
//! # Responsibility
//! - Validate type nesting and cycle invariants above the repository layer.
//! - Keep `root_project_id` consistent on create and cross-project moves.
//! - Serialize structural mutations per project through `ProjectLeases`.
//!
//! # Invariants
//! - A node is only ever stored under a parent of `node_type.allowed_parent()`.
//! - Projects have no parent and cannot be moved under one.
//! - Every structural write holds a lease covering each project it touches.
//! - Reads never take leases.

use crate::lease::{ProjectLease, ProjectLeases};
use crate::model::definition::DefinitionId;
use crate::model::node::{NewNode, Node, NodeId, NodePatch, NodeType, ProjectId};
use crate::repo::common::RepoError;
use crate::repo::node_repo::NodeRepository;
use log::info;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Errors from tree service operations.
#[derive(Debug)]
pub enum TreeError {
    /// Title of this node is blank after trim.
    InvalidTitle(NodeId),
    /// Target node does not exist.
    NodeNotFound(NodeId),
    /// Parent node does not exist.
    ParentNotFound(NodeId),
    /// Referenced definition does not exist.
    DefinitionNotFound(DefinitionId),
    /// Node type may not sit under the given parent type.
    InvalidHierarchy {
        node_id: NodeId,
        node_type: NodeType,
        parent_type: Option<NodeType>,
    },
    /// Operation would make a node its own ancestor.
    CycleDetected {
        node_id: NodeId,
        parent_id: NodeId,
    },
    /// Caller-supplied lease does not cover the project being mutated.
    LeaseNotHeld(ProjectId),
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTitle(id) => write!(f, "title of node {id} must not be blank"),
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent node not found: {id}"),
            Self::DefinitionNotFound(id) => write!(f, "definition not found: {id}"),
            Self::InvalidHierarchy {
                node_id,
                node_type,
                parent_type: Some(parent_type),
            } => write!(
                f,
                "invalid hierarchy: {node_type} node {node_id} cannot be placed under a {parent_type}"
            ),
            Self::InvalidHierarchy {
                node_id,
                node_type,
                parent_type: None,
            } => write!(
                f,
                "invalid hierarchy: {node_type} node {node_id} requires a parent"
            ),
            Self::CycleDetected { node_id, parent_id } => write!(
                f,
                "cycle detected: node {node_id} cannot be placed under its descendant {parent_id}"
            ),
            Self::LeaseNotHeld(project_id) => {
                write!(f, "project lease not held: {project_id}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TreeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NodeNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Post-delete collaborator (records, external references).
pub trait NodeCleanupHook: Send + Sync {
    /// Called after the delete committed, with every removed id.
    fn on_nodes_deleted(&self, removed: &[NodeId]);
}

/// Tree store facade over a node repository.
pub struct TreeService<R: NodeRepository> {
    repo: R,
    leases: Arc<ProjectLeases>,
    cleanup_hooks: Vec<Arc<dyn NodeCleanupHook>>,
}

impl<R: NodeRepository> TreeService<R> {
    /// Creates service from repository implementation and shared lease registry.
    pub fn new(repo: R, leases: Arc<ProjectLeases>) -> Self {
        Self {
            repo,
            leases,
            cleanup_hooks: Vec::new(),
        }
    }

    /// Registers a collaborator notified after each subtree delete.
    pub fn with_cleanup_hook(mut self, hook: Arc<dyn NodeCleanupHook>) -> Self {
        self.cleanup_hooks.push(hook);
        self
    }

    pub fn leases(&self) -> &Arc<ProjectLeases> {
        &self.leases
    }

    /// Creates one node, taking the lease of the project it lands in.
    pub fn create_node(&self, node: NewNode) -> Result<Node, TreeError> {
        let lease = match node.parent_id {
            Some(parent_id) => self.lease_for_node(parent_id, TreeError::ParentNotFound)?.0,
            None => self.leases.acquire(&[node.id]),
        };
        self.create_node_leased(&lease, node)
    }

    /// Creates one node under a lease the caller already holds.
    ///
    /// # Contract
    /// - Parent must exist and be exactly one chain level above `node_type`.
    /// - `root_project_id` is the parent's, or the node's own id for projects.
    /// - Missing `position` appends after the last sibling.
    pub fn create_node_leased(
        &self,
        lease: &ProjectLease<'_>,
        mut node: NewNode,
    ) -> Result<Node, TreeError> {
        node.title = normalize_title(node.id, &node.title)?;

        let parent = match node.parent_id {
            Some(parent_id) => Some(
                self.repo
                    .get_node(parent_id)?
                    .ok_or(TreeError::ParentNotFound(parent_id))?,
            ),
            None => None,
        };
        let parent_type = parent.as_ref().map(|item| item.node_type);
        if !node.node_type.can_attach_to(parent_type) {
            return Err(TreeError::InvalidHierarchy {
                node_id: node.id,
                node_type: node.node_type,
                parent_type,
            });
        }

        let root_project_id = parent
            .as_ref()
            .map_or(node.id, |item| item.root_project_id);
        if !lease.covers(root_project_id) {
            return Err(TreeError::LeaseNotHeld(root_project_id));
        }
        if let Some(definition_id) = node.default_record_def_id {
            self.ensure_definition_exists(definition_id)?;
        }

        let position = match node.position {
            Some(position) => position,
            None => self.repo.next_position(node.parent_id)?,
        };
        let created = self.repo.insert_node(&node, root_project_id, position)?;
        info!(
            "event=node_create module=tree status=ok node_id={} node_type={} root_project_id={}",
            created.id, created.node_type, created.root_project_id
        );
        Ok(created)
    }

    /// Loads one node.
    pub fn get_node(&self, id: NodeId) -> Result<Option<Node>, TreeError> {
        self.repo.get_node(id).map_err(Into::into)
    }

    /// Loads one node or fails with `NodeNotFound`.
    pub fn require_node(&self, id: NodeId) -> Result<Node, TreeError> {
        self.repo.get_node(id)?.ok_or(TreeError::NodeNotFound(id))
    }

    /// Lists direct children ordered by position.
    pub fn get_children(&self, parent_id: NodeId) -> Result<Vec<Node>, TreeError> {
        self.require_node(parent_id)?;
        self.repo.list_children(parent_id).map_err(Into::into)
    }

    /// Returns a lazy pre-order walk of `root_id` and its descendants.
    ///
    /// Each call starts a fresh read-only pass.
    pub fn get_subtree(&self, root_id: NodeId) -> Result<Subtree<'_, R>, TreeError> {
        let root = self.require_node(root_id)?;
        Ok(Subtree {
            repo: &self.repo,
            stack: vec![(root, 0)],
        })
    }

    /// Lists project nodes.
    pub fn list_projects(&self) -> Result<Vec<Node>, TreeError> {
        self.repo.list_projects().map_err(Into::into)
    }

    /// Lists every node of one project through the denormalized scope column.
    pub fn list_project_nodes(&self, project_id: ProjectId) -> Result<Vec<Node>, TreeError> {
        self.repo
            .list_project_nodes(project_id)
            .map_err(Into::into)
    }

    /// Updates node content fields.
    pub fn update_node(&self, id: NodeId, mut patch: NodePatch) -> Result<Node, TreeError> {
        if let Some(title) = patch.title.take() {
            patch.title = Some(normalize_title(id, &title)?);
        }
        let (_lease, _) = self.lease_for_node(id, TreeError::NodeNotFound)?;
        self.repo.update_node(id, &patch).map_err(Into::into)
    }

    /// Points a node at a record definition, or clears the pointer.
    pub fn set_default_record_def(
        &self,
        id: NodeId,
        definition_id: Option<DefinitionId>,
    ) -> Result<Node, TreeError> {
        let (_lease, _) = self.lease_for_node(id, TreeError::NodeNotFound)?;
        if let Some(definition_id) = definition_id {
            self.ensure_definition_exists(definition_id)?;
        }
        self.repo.set_default_record_def(id, definition_id)?;
        self.require_node(id)
    }

    /// Sets `default_record_def_id` under a lease the caller already holds.
    pub fn set_default_record_def_leased(
        &self,
        lease: &ProjectLease<'_>,
        id: NodeId,
        definition_id: Option<DefinitionId>,
    ) -> Result<(), TreeError> {
        let node = self.require_node(id)?;
        if !lease.covers(node.root_project_id) {
            return Err(TreeError::LeaseNotHeld(node.root_project_id));
        }
        self.repo
            .set_default_record_def(id, definition_id)
            .map_err(Into::into)
    }

    /// Moves one node (and its subtree) under `new_parent_id`.
    ///
    /// `position` is a target index among the new siblings; siblings are
    /// renumbered densely. Crossing into another project rewrites
    /// `root_project_id` for the whole moved subtree.
    pub fn move_node(
        &self,
        id: NodeId,
        new_parent_id: NodeId,
        position: Option<i64>,
    ) -> Result<Node, TreeError> {
        let (_lease, node, parent) = loop {
            let node = self.require_node(id)?;
            let parent = self
                .repo
                .get_node(new_parent_id)?
                .ok_or(TreeError::ParentNotFound(new_parent_id))?;
            let lease = self
                .leases
                .acquire(&[node.root_project_id, parent.root_project_id]);
            let node_now = self.require_node(id)?;
            let parent_now = self
                .repo
                .get_node(new_parent_id)?
                .ok_or(TreeError::ParentNotFound(new_parent_id))?;
            if lease.covers(node_now.root_project_id) && lease.covers(parent_now.root_project_id)
            {
                break (lease, node_now, parent_now);
            }
        };

        if new_parent_id == id || self.is_within_subtree(id, new_parent_id)? {
            return Err(TreeError::CycleDetected {
                node_id: id,
                parent_id: new_parent_id,
            });
        }
        if !node.node_type.can_attach_to(Some(parent.node_type)) {
            return Err(TreeError::InvalidHierarchy {
                node_id: id,
                node_type: node.node_type,
                parent_type: Some(parent.node_type),
            });
        }

        let rescoped = self.repo.move_subtree(
            id,
            new_parent_id,
            parent.root_project_id,
            position.map(|value| value.max(0)),
        )?;
        info!(
            "event=node_move module=tree status=ok node_id={} from_project={} to_project={} rescoped={}",
            id, node.root_project_id, parent.root_project_id, rescoped
        );
        self.require_node(id)
    }

    /// Deletes one node and its full descendant subtree.
    ///
    /// Returns removed ids. Cleanup hooks run after the delete committed.
    pub fn delete_node(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let removed = {
            let (_lease, node) = self.lease_for_node(id, TreeError::NodeNotFound)?;
            let removed = self.repo.delete_subtree(id)?;
            info!(
                "event=node_delete module=tree status=ok node_id={} root_project_id={} removed={}",
                id,
                node.root_project_id,
                removed.len()
            );
            removed
        };
        for hook in &self.cleanup_hooks {
            hook.on_nodes_deleted(&removed);
        }
        Ok(removed)
    }

    /// Returns whether `candidate` is `ancestor` or one of its descendants.
    ///
    /// Walks parent pointers from `candidate`; the walk is bounded by the
    /// chain length, so corrupted data cannot loop.
    pub fn is_within_subtree(
        &self,
        ancestor: NodeId,
        candidate: NodeId,
    ) -> Result<bool, TreeError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate);
        while let Some(current) = cursor {
            if current == ancestor {
                return Ok(true);
            }
            if !visited.insert(current) || visited.len() > NodeType::CHAIN.len() {
                return Ok(true);
            }
            let node = self
                .repo
                .get_node(current)?
                .ok_or(TreeError::ParentNotFound(current))?;
            cursor = node.parent_id;
        }
        Ok(false)
    }

    /// Acquires the lease of the project `id` currently belongs to.
    ///
    /// Retries when the node changed project between the lock-free read and
    /// the lease acquisition.
    fn lease_for_node(
        &self,
        id: NodeId,
        missing: fn(NodeId) -> TreeError,
    ) -> Result<(ProjectLease<'_>, Node), TreeError> {
        loop {
            let before = self.repo.get_node(id)?.ok_or_else(|| missing(id))?;
            let lease = self.leases.acquire(&[before.root_project_id]);
            let after = self.repo.get_node(id)?.ok_or_else(|| missing(id))?;
            if after.root_project_id == before.root_project_id {
                return Ok((lease, after));
            }
        }
    }

    fn ensure_definition_exists(&self, definition_id: DefinitionId) -> Result<(), TreeError> {
        if self.repo.definition_exists(definition_id)? {
            Ok(())
        } else {
            Err(TreeError::DefinitionNotFound(definition_id))
        }
    }
}

/// Lazy pre-order traversal returned by `TreeService::get_subtree`.
///
/// Children are read one level at a time as the walk descends.
pub struct Subtree<'a, R: NodeRepository> {
    repo: &'a R,
    stack: Vec<(Node, usize)>,
}

impl<R: NodeRepository> Iterator for Subtree<'_, R> {
    type Item = Result<Node, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (node, depth) = self.stack.pop()?;
        if depth + 1 < NodeType::CHAIN.len() {
            match self.repo.list_children(node.id) {
                Ok(children) => {
                    self.stack
                        .extend(children.into_iter().rev().map(|child| (child, depth + 1)));
                }
                Err(err) => {
                    self.stack.clear();
                    return Some(Err(err.into()));
                }
            }
        }
        Some(Ok(node))
    }
}

fn normalize_title(id: NodeId, value: &str) -> Result<String, TreeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TreeError::InvalidTitle(id));
    }
    Ok(trimmed.to_string())
}
