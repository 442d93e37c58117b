//! Hierarchy node model.
//!
//! # Responsibility
//! - Define the work-item node shape shared by tree, rewrite and clone code.
//! - Own the fixed type chain `project -> process -> stage -> subprocess -> task`.
//!
//! # Invariants
//! - `NodeType::Project` <=> `parent_id == None` <=> `root_project_id == id`.
//! - A non-project node sits exactly one level below its parent's type.
//! - `root_project_id` is the id of the nearest project ancestor.

use crate::model::definition::DefinitionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable hierarchy node identifier.
pub type NodeId = Uuid;

/// Node id of a `project` node, used as the scope key for leases and libraries.
pub type ProjectId = Uuid;

/// Identity recorded in `created_by`.
pub type ActorId = String;

/// Opaque key/value bag carried by nodes.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Level of a node in the fixed type chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Project,
    Process,
    Stage,
    Subprocess,
    Task,
}

impl NodeType {
    /// All levels, shallowest first.
    pub const CHAIN: [NodeType; 5] = [
        NodeType::Project,
        NodeType::Process,
        NodeType::Stage,
        NodeType::Subprocess,
        NodeType::Task,
    ];

    /// Zero-based depth in the chain. Also the number of ancestors a node of
    /// this type has in a valid tree.
    pub fn level(self) -> usize {
        match self {
            Self::Project => 0,
            Self::Process => 1,
            Self::Stage => 2,
            Self::Subprocess => 3,
            Self::Task => 4,
        }
    }

    /// The only parent type this type may be attached under.
    pub fn allowed_parent(self) -> Option<NodeType> {
        match self {
            Self::Project => None,
            Self::Process => Some(Self::Project),
            Self::Stage => Some(Self::Process),
            Self::Subprocess => Some(Self::Stage),
            Self::Task => Some(Self::Subprocess),
        }
    }

    /// The only child type this type may contain.
    pub fn allowed_child(self) -> Option<NodeType> {
        Self::CHAIN.get(self.level() + 1).copied()
    }

    /// Returns whether a node of this type may be placed under `parent`.
    ///
    /// `None` stands for "no parent", which only projects accept.
    pub fn can_attach_to(self, parent: Option<NodeType>) -> bool {
        self.allowed_parent() == parent
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Process => "process",
            Self::Stage => "stage",
            Self::Subprocess => "subprocess",
            Self::Task => "task",
        }
    }

    pub fn parse(value: &str) -> Option<NodeType> {
        match value {
            "project" => Some(Self::Project),
            "process" => Some(Self::Process),
            "stage" => Some(Self::Stage),
            "subprocess" => Some(Self::Subprocess),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hierarchy node read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// `None` only for projects.
    pub parent_id: Option<NodeId>,
    /// Denormalized owning project; equals `id` for projects.
    pub root_project_id: ProjectId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: String,
    /// Rich-document value, opaque to the tree store.
    pub description: Option<serde_json::Value>,
    /// Sibling order key. Not unique.
    pub position: i64,
    pub default_record_def_id: Option<DefinitionId>,
    pub metadata: Metadata,
    pub is_template: bool,
    pub created_by: ActorId,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

impl Node {
    pub fn is_project(&self) -> bool {
        self.node_type == NodeType::Project
    }
}

/// Insert payload for one node.
///
/// `root_project_id` is not part of the payload: the store always derives it
/// from the parent (or from `id` for projects).
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub node_type: NodeType,
    pub title: String,
    pub description: Option<serde_json::Value>,
    /// `None` appends after the current last sibling.
    pub position: Option<i64>,
    pub default_record_def_id: Option<DefinitionId>,
    pub metadata: Metadata,
    pub is_template: bool,
    pub created_by: ActorId,
}

impl NewNode {
    /// Creates a payload with a fresh id and empty optional fields.
    pub fn new(
        parent_id: Option<NodeId>,
        node_type: NodeType,
        title: impl Into<String>,
        created_by: impl Into<ActorId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            node_type,
            title: title.into(),
            description: None,
            position: None,
            default_record_def_id: None,
            metadata: Metadata::new(),
            is_template: false,
            created_by: created_by.into(),
        }
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }
}

/// Re-insert payload for an existing node value, keeping its id and position.
impl From<Node> for NewNode {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_id,
            node_type: node.node_type,
            title: node.title,
            description: node.description,
            position: Some(node.position),
            default_record_def_id: node.default_record_def_id,
            metadata: node.metadata,
            is_template: node.is_template,
            created_by: node.created_by,
        }
    }
}

/// Partial update for mutable node content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<serde_json::Value>>,
    pub metadata: Option<Metadata>,
    pub is_template: Option<bool>,
}
