//! Record definition repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist record definitions, their derivation links and library scope.
//! - Answer reference counts against `nodes.default_record_def_id`.
//!
//! # Invariants
//! - `definitions.name` is unique (DB constraint).
//! - Deleting a definition detaches its direct derivatives
//!   (`derived_from_id = NULL`) in the same transaction.
//! - Library listing is deterministic: `pinned DESC, name ASC`.

use crate::model::definition::{Definition, DefinitionId, NewDefinition, SchemaConfig, Styling};
use crate::model::node::ProjectId;
use crate::repo::common::{
    bool_to_int, ensure_connection_ready, parse_bool, parse_json, parse_optional_uuid,
    parse_uuid, to_json, with_write_tx, RepoError, RepoResult,
};
use crate::repo::node_repo::count_definition_references;
use rusqlite::{params, Connection, Row};

const DEFINITION_SELECT_SQL: &str = "SELECT
    id,
    name,
    derived_from_id,
    schema_config,
    styling,
    project_id,
    is_template,
    clone_excluded,
    pinned,
    created_at,
    updated_at
FROM definitions";

const DEFINITION_COLUMNS: &[&str] = &[
    "id",
    "name",
    "derived_from_id",
    "schema_config",
    "styling",
    "project_id",
    "is_template",
    "clone_excluded",
    "pinned",
    "created_at",
    "updated_at",
];

/// Single boolean column a registry operation toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFlag {
    CloneExcluded,
    Pinned,
}

impl DefinitionFlag {
    fn column(self) -> &'static str {
        match self {
            Self::CloneExcluded => "clone_excluded",
            Self::Pinned => "pinned",
        }
    }
}

/// Repository interface for record definitions.
pub trait DefinitionRepository {
    /// Inserts one definition.
    fn insert_definition(&self, definition: &NewDefinition) -> RepoResult<Definition>;
    /// Loads one definition by id.
    fn get_definition(&self, id: DefinitionId) -> RepoResult<Option<Definition>>;
    /// Loads one definition by exact name.
    fn find_by_name(&self, name: &str) -> RepoResult<Option<Definition>>;
    /// Lists names starting with `prefix` (used to pick copy names).
    fn list_names_with_prefix(&self, prefix: &str) -> RepoResult<Vec<String>>;
    /// Lists template definitions owned by one project library.
    fn list_library(&self, project_id: ProjectId) -> RepoResult<Vec<Definition>>;
    /// Sets library ownership and template flag.
    fn set_library_scope(
        &self,
        id: DefinitionId,
        project_id: Option<ProjectId>,
        is_template: bool,
    ) -> RepoResult<Definition>;
    /// Sets one boolean flag.
    fn set_flag(&self, id: DefinitionId, flag: DefinitionFlag, value: bool)
        -> RepoResult<Definition>;
    /// Re-points `derived_from_id`.
    fn set_derived_from(
        &self,
        id: DefinitionId,
        derived_from_id: Option<DefinitionId>,
    ) -> RepoResult<Definition>;
    /// Deletes one definition and detaches its direct derivatives.
    fn delete_definition(&self, id: DefinitionId) -> RepoResult<()>;
    /// Counts nodes pointing at `id`, optionally ignoring one project.
    fn count_node_references(
        &self,
        id: DefinitionId,
        outside_project: Option<ProjectId>,
    ) -> RepoResult<i64>;
}

/// SQLite-backed definition repository.
pub struct SqliteDefinitionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDefinitionRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, "definitions", DEFINITION_COLUMNS)?;
        Ok(Self { conn })
    }
}

impl DefinitionRepository for SqliteDefinitionRepository<'_> {
    fn insert_definition(&self, definition: &NewDefinition) -> RepoResult<Definition> {
        self.conn.execute(
            "INSERT INTO definitions (
                id,
                name,
                derived_from_id,
                schema_config,
                styling,
                project_id,
                is_template,
                clone_excluded,
                pinned
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                definition.id.to_string(),
                definition.name.as_str(),
                definition.derived_from_id.map(|value| value.to_string()),
                to_json(&definition.schema_config, "definitions.schema_config")?,
                to_json(&definition.styling, "definitions.styling")?,
                definition.project_id.map(|value| value.to_string()),
                bool_to_int(definition.is_template),
                bool_to_int(definition.clone_excluded),
                bool_to_int(definition.pinned),
            ],
        )?;
        load_required_definition(self.conn, definition.id)
    }

    fn get_definition(&self, id: DefinitionId) -> RepoResult<Option<Definition>> {
        load_definition(self.conn, id)
    }

    fn find_by_name(&self, name: &str) -> RepoResult<Option<Definition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DEFINITION_SELECT_SQL} WHERE name = ?1;"))?;
        let mut rows = stmt.query([name])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_definition_row(row)?));
        }
        Ok(None)
    }

    fn list_names_with_prefix(&self, prefix: &str) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name
             FROM definitions
             WHERE substr(name, 1, length(?1)) = ?1
             ORDER BY name ASC;",
        )?;
        let mut rows = stmt.query([prefix])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    fn list_library(&self, project_id: ProjectId) -> RepoResult<Vec<Definition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE project_id = ?1
               AND is_template = 1
             ORDER BY pinned DESC, name ASC;"
        ))?;
        let mut rows = stmt.query([project_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_definition_row(row)?);
        }
        Ok(items)
    }

    fn set_library_scope(
        &self,
        id: DefinitionId,
        project_id: Option<ProjectId>,
        is_template: bool,
    ) -> RepoResult<Definition> {
        let changed = self.conn.execute(
            "UPDATE definitions
             SET project_id = ?2,
                 is_template = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                id.to_string(),
                project_id.map(|value| value.to_string()),
                bool_to_int(is_template),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        load_required_definition(self.conn, id)
    }

    fn set_flag(
        &self,
        id: DefinitionId,
        flag: DefinitionFlag,
        value: bool,
    ) -> RepoResult<Definition> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE definitions
                 SET {} = ?2,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                flag.column()
            ),
            params![id.to_string(), bool_to_int(value)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        load_required_definition(self.conn, id)
    }

    fn set_derived_from(
        &self,
        id: DefinitionId,
        derived_from_id: Option<DefinitionId>,
    ) -> RepoResult<Definition> {
        let changed = self.conn.execute(
            "UPDATE definitions
             SET derived_from_id = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), derived_from_id.map(|value| value.to_string())],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        load_required_definition(self.conn, id)
    }

    fn delete_definition(&self, id: DefinitionId) -> RepoResult<()> {
        with_write_tx(self.conn, |conn| {
            conn.execute(
                "UPDATE definitions
                 SET derived_from_id = NULL,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE derived_from_id = ?1;",
                [id.to_string()],
            )?;
            let changed = conn.execute("DELETE FROM definitions WHERE id = ?1;", [id.to_string()])?;
            if changed == 0 {
                return Err(RepoError::NotFound(id));
            }
            Ok(())
        })
    }

    fn count_node_references(
        &self,
        id: DefinitionId,
        outside_project: Option<ProjectId>,
    ) -> RepoResult<i64> {
        count_definition_references(self.conn, id, outside_project)
    }
}

fn load_definition(conn: &Connection, id: DefinitionId) -> RepoResult<Option<Definition>> {
    let mut stmt = conn.prepare(&format!("{DEFINITION_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_definition_row(row)?));
    }
    Ok(None)
}

fn load_required_definition(conn: &Connection, id: DefinitionId) -> RepoResult<Definition> {
    load_definition(conn, id)?.ok_or(RepoError::NotFound(id))
}

fn parse_definition_row(row: &Row<'_>) -> RepoResult<Definition> {
    let id_text: String = row.get("id")?;
    let schema_text: String = row.get("schema_config")?;
    let styling_text: String = row.get("styling")?;
    let schema_config: SchemaConfig = parse_json(&schema_text, "definitions.schema_config")?;
    let styling: Styling = parse_json(&styling_text, "definitions.styling")?;

    Ok(Definition {
        id: parse_uuid(&id_text, "definitions.id")?,
        name: row.get("name")?,
        derived_from_id: parse_optional_uuid(
            row.get("derived_from_id")?,
            "definitions.derived_from_id",
        )?,
        schema_config,
        styling,
        project_id: parse_optional_uuid(row.get("project_id")?, "definitions.project_id")?,
        is_template: parse_bool(row.get("is_template")?, "definitions.is_template")?,
        clone_excluded: parse_bool(row.get("clone_excluded")?, "definitions.clone_excluded")?,
        pinned: parse_bool(row.get("pinned")?, "definitions.pinned")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
