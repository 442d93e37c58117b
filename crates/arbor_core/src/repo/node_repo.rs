//! Hierarchy node repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the adjacency-list tree (`nodes.parent_id`) and its denormalized
//!   project scope (`nodes.root_project_id`).
//! - Keep SQL details and ordering behavior inside the repository boundary.
//!
//! # Invariants
//! - Child listing is deterministic: `position ASC`, then insertion order.
//! - Multi-row writes (move, delete) run in one transaction.
//! - The repository does not check the type chain; `TreeService` does.

use crate::model::definition::DefinitionId;
use crate::model::node::{Metadata, NewNode, Node, NodeId, NodePatch, NodeType, ProjectId};
use crate::repo::common::{
    bool_to_int, ensure_connection_ready, parse_bool, parse_json, parse_optional_uuid,
    parse_uuid, to_json, with_write_tx, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const NODE_SELECT_SQL: &str = "SELECT
    id,
    parent_id,
    root_project_id,
    type,
    title,
    description,
    position,
    default_record_def_id,
    metadata,
    is_template,
    created_by,
    created_at,
    updated_at
FROM nodes";

const NODE_COLUMNS: &[&str] = &[
    "id",
    "parent_id",
    "root_project_id",
    "type",
    "title",
    "description",
    "position",
    "default_record_def_id",
    "metadata",
    "is_template",
    "created_by",
    "created_at",
    "updated_at",
];

const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
    SELECT id FROM nodes WHERE id = ?1
    UNION ALL
    SELECT child.id
    FROM nodes child
    INNER JOIN subtree parent ON child.parent_id = parent.id
)";

/// Repository interface for hierarchy node storage.
pub trait NodeRepository {
    /// Inserts one node with an already resolved project scope and position.
    fn insert_node(
        &self,
        node: &NewNode,
        root_project_id: ProjectId,
        position: i64,
    ) -> RepoResult<Node>;
    /// Loads one node by id.
    fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>>;
    /// Lists direct children ordered by position.
    fn list_children(&self, parent_id: NodeId) -> RepoResult<Vec<Node>>;
    /// Lists all project (root) nodes ordered by position.
    fn list_projects(&self) -> RepoResult<Vec<Node>>;
    /// Lists every node scoped to one project, project node included.
    fn list_project_nodes(&self, root_project_id: ProjectId) -> RepoResult<Vec<Node>>;
    /// Returns one greater than the current maximum sibling position.
    fn next_position(&self, parent_id: Option<NodeId>) -> RepoResult<i64>;
    /// Applies a content patch and returns the updated node.
    fn update_node(&self, id: NodeId, patch: &NodePatch) -> RepoResult<Node>;
    /// Sets or clears `default_record_def_id`.
    fn set_default_record_def(
        &self,
        id: NodeId,
        definition_id: Option<DefinitionId>,
    ) -> RepoResult<()>;
    /// Re-parents `id`, places it at `target_index` among its new siblings
    /// (renumbering them densely) and rewrites `root_project_id` across the
    /// moved subtree. Returns how many nodes changed project.
    fn move_subtree(
        &self,
        id: NodeId,
        new_parent_id: NodeId,
        new_root_project_id: ProjectId,
        target_index: Option<i64>,
    ) -> RepoResult<usize>;
    /// Removes `id` and all descendants. Returns the removed ids.
    fn delete_subtree(&self, id: NodeId) -> RepoResult<Vec<NodeId>>;
    /// Returns whether a definition row exists.
    fn definition_exists(&self, definition_id: DefinitionId) -> RepoResult<bool>;
}

/// SQLite-backed node repository.
pub struct SqliteNodeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNodeRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, "nodes", NODE_COLUMNS)?;
        Ok(Self { conn })
    }

    fn query_nodes(&self, sql: &str, param: Option<String>) -> RepoResult<Vec<Node>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = match param {
            Some(value) => stmt.query([value])?,
            None => stmt.query([])?,
        };
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_node_row(row)?);
        }
        Ok(items)
    }
}

impl NodeRepository for SqliteNodeRepository<'_> {
    fn insert_node(
        &self,
        node: &NewNode,
        root_project_id: ProjectId,
        position: i64,
    ) -> RepoResult<Node> {
        let description = node
            .description
            .as_ref()
            .map(|value| to_json(value, "nodes.description"))
            .transpose()?;
        self.conn.execute(
            "INSERT INTO nodes (
                id,
                parent_id,
                root_project_id,
                type,
                title,
                description,
                position,
                default_record_def_id,
                metadata,
                is_template,
                created_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                node.id.to_string(),
                node.parent_id.map(|value| value.to_string()),
                root_project_id.to_string(),
                node.node_type.as_str(),
                node.title.as_str(),
                description,
                position,
                node.default_record_def_id.map(|value| value.to_string()),
                to_json(&node.metadata, "nodes.metadata")?,
                bool_to_int(node.is_template),
                node.created_by.as_str(),
            ],
        )?;
        load_required_node(self.conn, node.id)
    }

    fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>> {
        load_node(self.conn, id)
    }

    fn list_children(&self, parent_id: NodeId) -> RepoResult<Vec<Node>> {
        self.query_nodes(
            &format!("{NODE_SELECT_SQL} WHERE parent_id = ?1 ORDER BY position ASC, rowid ASC;"),
            Some(parent_id.to_string()),
        )
    }

    fn list_projects(&self) -> RepoResult<Vec<Node>> {
        self.query_nodes(
            &format!("{NODE_SELECT_SQL} WHERE parent_id IS NULL ORDER BY position ASC, rowid ASC;"),
            None,
        )
    }

    fn list_project_nodes(&self, root_project_id: ProjectId) -> RepoResult<Vec<Node>> {
        self.query_nodes(
            &format!(
                "{NODE_SELECT_SQL} WHERE root_project_id = ?1 ORDER BY position ASC, rowid ASC;"
            ),
            Some(root_project_id.to_string()),
        )
    }

    fn next_position(&self, parent_id: Option<NodeId>) -> RepoResult<i64> {
        next_position(self.conn, parent_id)
    }

    fn update_node(&self, id: NodeId, patch: &NodePatch) -> RepoResult<Node> {
        let mut node = load_required_node(self.conn, id)?;
        if let Some(title) = &patch.title {
            node.title = title.clone();
        }
        if let Some(description) = &patch.description {
            node.description = description.clone();
        }
        if let Some(metadata) = &patch.metadata {
            node.metadata = metadata.clone();
        }
        if let Some(is_template) = patch.is_template {
            node.is_template = is_template;
        }

        let description = node
            .description
            .as_ref()
            .map(|value| to_json(value, "nodes.description"))
            .transpose()?;
        self.conn.execute(
            "UPDATE nodes
             SET title = ?2,
                 description = ?3,
                 metadata = ?4,
                 is_template = ?5,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                id.to_string(),
                node.title.as_str(),
                description,
                to_json(&node.metadata, "nodes.metadata")?,
                bool_to_int(node.is_template),
            ],
        )?;
        load_required_node(self.conn, id)
    }

    fn set_default_record_def(
        &self,
        id: NodeId,
        definition_id: Option<DefinitionId>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE nodes
             SET default_record_def_id = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), definition_id.map(|value| value.to_string())],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn move_subtree(
        &self,
        id: NodeId,
        new_parent_id: NodeId,
        new_root_project_id: ProjectId,
        target_index: Option<i64>,
    ) -> RepoResult<usize> {
        with_write_tx(self.conn, |conn| {
            if load_node(conn, id)?.is_none() {
                return Err(RepoError::NotFound(id));
            }

            let mut sibling_ids = list_child_ids(conn, new_parent_id)?;
            sibling_ids.retain(|sibling| *sibling != id);
            let target = target_index
                .unwrap_or(sibling_ids.len() as i64)
                .clamp(0, sibling_ids.len() as i64) as usize;
            sibling_ids.insert(target, id);

            conn.execute(
                "UPDATE nodes
                 SET parent_id = ?2,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![id.to_string(), new_parent_id.to_string()],
            )?;

            for (index, sibling) in sibling_ids.into_iter().enumerate() {
                conn.execute(
                    "UPDATE nodes
                     SET position = ?2
                     WHERE id = ?1
                       AND position <> ?2;",
                    params![sibling.to_string(), index as i64],
                )?;
            }

            let rescoped = conn.execute(
                &format!(
                    "{SUBTREE_CTE}
                     UPDATE nodes
                     SET root_project_id = ?2,
                         updated_at = (strftime('%s', 'now') * 1000)
                     WHERE id IN (SELECT id FROM subtree)
                       AND root_project_id <> ?2;"
                ),
                params![id.to_string(), new_root_project_id.to_string()],
            )?;
            Ok(rescoped)
        })
    }

    fn delete_subtree(&self, id: NodeId) -> RepoResult<Vec<NodeId>> {
        with_write_tx(self.conn, |conn| {
            let removed = list_subtree_ids(conn, id)?;
            if removed.is_empty() {
                return Err(RepoError::NotFound(id));
            }
            conn.execute(
                &format!(
                    "{SUBTREE_CTE}
                     DELETE FROM nodes
                     WHERE id IN (SELECT id FROM subtree);"
                ),
                [id.to_string()],
            )?;
            Ok(removed)
        })
    }

    fn definition_exists(&self, definition_id: DefinitionId) -> RepoResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM definitions WHERE id = ?1;",
                [definition_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn load_node(conn: &Connection, id: NodeId) -> RepoResult<Option<Node>> {
    let mut stmt = conn.prepare(&format!("{NODE_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_node_row(row)?));
    }
    Ok(None)
}

fn load_required_node(conn: &Connection, id: NodeId) -> RepoResult<Node> {
    load_node(conn, id)?.ok_or(RepoError::NotFound(id))
}

fn list_child_ids(conn: &Connection, parent_id: NodeId) -> RepoResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(
        "SELECT id
         FROM nodes
         WHERE parent_id = ?1
         ORDER BY position ASC, rowid ASC;",
    )?;
    let mut rows = stmt.query([parent_id.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "nodes.id")?);
    }
    Ok(ids)
}

fn list_subtree_ids(conn: &Connection, id: NodeId) -> RepoResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(&format!("{SUBTREE_CTE} SELECT id FROM subtree;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "nodes.id")?);
    }
    Ok(ids)
}

fn next_position(conn: &Connection, parent_id: Option<NodeId>) -> RepoResult<i64> {
    let next = match parent_id {
        Some(parent_id) => conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1
             FROM nodes
             WHERE parent_id = ?1;",
            [parent_id.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1
             FROM nodes
             WHERE parent_id IS NULL;",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(next)
}

fn parse_node_row(row: &Row<'_>) -> RepoResult<Node> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "nodes.id")?;
    let root_text: String = row.get("root_project_id")?;

    let type_text: String = row.get("type")?;
    let node_type = NodeType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid node type `{type_text}` in nodes.type"))
    })?;

    let description = row
        .get::<_, Option<String>>("description")?
        .map(|text| parse_json::<serde_json::Value>(&text, "nodes.description"))
        .transpose()?;
    let metadata_text: String = row.get("metadata")?;
    let metadata: Metadata = parse_json(&metadata_text, "nodes.metadata")?;

    Ok(Node {
        id,
        parent_id: parse_optional_uuid(row.get("parent_id")?, "nodes.parent_id")?,
        root_project_id: parse_uuid(&root_text, "nodes.root_project_id")?,
        node_type,
        title: row.get("title")?,
        description,
        position: row.get("position")?,
        default_record_def_id: parse_optional_uuid(
            row.get("default_record_def_id")?,
            "nodes.default_record_def_id",
        )?,
        metadata,
        is_template: parse_bool(row.get("is_template")?, "nodes.is_template")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Counts nodes pointing at `definition_id`, optionally only outside one project.
pub(crate) fn count_definition_references(
    conn: &Connection,
    definition_id: DefinitionId,
    outside_project: Option<ProjectId>,
) -> RepoResult<i64> {
    let count = match outside_project {
        Some(project_id) => conn.query_row(
            "SELECT COUNT(*)
             FROM nodes
             WHERE default_record_def_id = ?1
               AND root_project_id <> ?2;",
            params![definition_id.to_string(), project_id.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*)
             FROM nodes
             WHERE default_record_def_id = ?1;",
            [definition_id.to_string()],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}
