//! SQLite implementation of [`ResourceStore`].
//!
//! [`SqliteStore`] persists the repository in a SQLite database with WAL
//! mode and automatic schema migrations. Aspect records, history entries
//! and projects are stored as JSON TEXT columns via serde_json, next to the
//! plain columns the queries filter on.
//!
//! Transactions map directly onto `BEGIN IMMEDIATE` / `COMMIT` /
//! `ROLLBACK`; outside a transaction every statement autocommits.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use folio_core::path;
use folio_core::{
    ContentAspect, ContentId, HistoryEntry, Project, ProjectId, PropertyDefinition, PublishJobId,
    PublishJobState, PublishTag, Relation, RelationTarget, RelationType, Resource,
    StructureAspect, StructureId,
};

use crate::error::StorageError;
use crate::traits::{PropertyMap, ResourceStore};
use crate::types::{PublishJobRecord, View};

/// Structure joined with its content and the sibling count.
const RESOURCE_SELECT: &str = "SELECT s.record_json, c.record_json, \
     (SELECT COUNT(*) FROM structures s2 WHERE s2.view = s.view AND s2.content_id = s.content_id) \
     FROM structures s \
     LEFT JOIN contents c ON c.view = s.view AND c.content_id = s.content_id";

const RELATION_SELECT: &str =
    "SELECT source_id, source_path, target_id, target_path, relation_type FROM relations";

/// SQLite-backed implementation of [`ResourceStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn query_resources<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Vec<Resource>, StorageError> {
        let sql = format!("{} {}", RESOURCE_SELECT, filter);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params, |row| {
            let structure: String = row.get(0)?;
            let content: Option<String> = row.get(1)?;
            let siblings: i64 = row.get(2)?;
            Ok((structure, content, siblings))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (structure, content, siblings) = row?;
            result.push(assemble(&structure, content.as_deref(), siblings)?);
        }
        Ok(result)
    }

    fn query_relations<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Vec<Relation>, StorageError> {
        let sql = format!("{} {}", RELATION_SELECT, filter);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params, |row| {
            let source_id: String = row.get(0)?;
            let source_path: String = row.get(1)?;
            let target_id: Option<String> = row.get(2)?;
            let target_path: String = row.get(3)?;
            let relation_type: String = row.get(4)?;
            Ok((source_id, source_path, target_id, target_path, relation_type))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (source_id, source_path, target_id, target_path, relation_type) = row?;
            let target = match target_id {
                Some(id) => RelationTarget::Resolved {
                    id: StructureId(parse_uuid(&id)?),
                    path: target_path,
                },
                None => RelationTarget::Unresolved { path: target_path },
            };
            result.push(Relation {
                source_id: StructureId(parse_uuid(&source_id)?),
                source_path,
                target,
                relation_type: str_to_relation_type(&relation_type)?,
            });
        }
        Ok(result)
    }

    fn query_history<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let sql = format!(
            "SELECT record_json FROM history {} ORDER BY publish_tag, path",
            filter
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    fn query_property_map<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<PropertyMap, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = PropertyMap::new();
        for row in rows {
            let (name, value) = row?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::integrity(format!("malformed id column '{}': {}", value, e)))
}

fn assemble(
    structure_json: &str,
    content_json: Option<&str>,
    siblings: i64,
) -> Result<Resource, StorageError> {
    let structure: StructureAspect = serde_json::from_str(structure_json)?;
    let content_json = content_json.ok_or_else(|| {
        StorageError::integrity(format!(
            "structure {} references missing content {}",
            structure.structure_id, structure.content_id
        ))
    })?;
    let content: ContentAspect = serde_json::from_str(content_json)?;
    Ok(Resource {
        structure,
        content,
        sibling_count: siblings as u32,
    })
}

/// Serializes a RelationType to TEXT.
fn relation_type_to_str(t: RelationType) -> &'static str {
    match t {
        RelationType::Hyperlink => "Hyperlink",
        RelationType::EmbeddedImage => "EmbeddedImage",
        RelationType::EmbeddedObject => "EmbeddedObject",
        RelationType::WeakReference => "WeakReference",
    }
}

/// Deserializes a RelationType from TEXT.
fn str_to_relation_type(s: &str) -> Result<RelationType, StorageError> {
    match s {
        "Hyperlink" => Ok(RelationType::Hyperlink),
        "EmbeddedImage" => Ok(RelationType::EmbeddedImage),
        "EmbeddedObject" => Ok(RelationType::EmbeddedObject),
        "WeakReference" => Ok(RelationType::WeakReference),
        other => Err(StorageError::integrity(format!(
            "unknown relation type '{}'",
            other
        ))),
    }
}

impl ResourceStore for SqliteStore {
    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    fn begin(&mut self) -> Result<(), StorageError> {
        if !self.conn.is_autocommit() {
            return Err(StorageError::Transaction {
                reason: "transaction already open".to_string(),
            });
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.conn.is_autocommit() {
            return Err(StorageError::Transaction {
                reason: "commit without begin".to_string(),
            });
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        if self.conn.is_autocommit() {
            return Err(StorageError::Transaction {
                reason: "rollback without begin".to_string(),
            });
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------

    fn read_resource(
        &self,
        view: View,
        id: StructureId,
    ) -> Result<Option<Resource>, StorageError> {
        let mut found = self.query_resources(
            "WHERE s.view = ?1 AND s.structure_id = ?2",
            params![view.as_str(), id.0.to_string()],
        )?;
        Ok(found.pop())
    }

    fn read_resource_by_path(
        &self,
        view: View,
        path: &str,
    ) -> Result<Option<Resource>, StorageError> {
        let mut found = self.query_resources(
            "WHERE s.view = ?1 AND s.path = ?2",
            params![view.as_str(), path],
        )?;
        Ok(found.pop())
    }

    fn read_siblings(
        &self,
        view: View,
        content_id: ContentId,
    ) -> Result<Vec<Resource>, StorageError> {
        self.query_resources(
            "WHERE s.view = ?1 AND s.content_id = ?2 ORDER BY s.path",
            params![view.as_str(), content_id.0.to_string()],
        )
    }

    fn read_subtree(
        &self,
        view: View,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Resource>, StorageError> {
        let all = self.query_resources(
            "WHERE s.view = ?1 AND substr(s.path, 1, length(?2)) = ?2 AND s.path <> ?2 \
             ORDER BY s.path",
            params![view.as_str(), folder],
        )?;
        if recursive {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|r| path::is_direct_child(r.path(), folder))
            .collect())
    }

    fn read_resources_in_project(
        &self,
        project: ProjectId,
    ) -> Result<Vec<Resource>, StorageError> {
        let all = self.query_resources(
            "WHERE s.view = ?1 ORDER BY s.path",
            params![View::Offline.as_str()],
        )?;
        Ok(all
            .into_iter()
            .filter(|r| {
                r.structure.project_last_modified == Some(project)
                    || r.content.project_last_modified == Some(project)
            })
            .collect())
    }

    fn write_structure(
        &mut self,
        view: View,
        structure: &StructureAspect,
    ) -> Result<(), StorageError> {
        let id = structure.structure_id.0.to_string();
        let occupant: Option<String> = self
            .conn
            .query_row(
                "SELECT structure_id FROM structures WHERE view = ?1 AND path = ?2",
                params![view.as_str(), structure.path],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(occupant) = occupant {
            if occupant != id {
                return Err(StorageError::integrity(format!(
                    "path {} already occupied in the {} view",
                    structure.path, view
                )));
            }
        }
        let previous_path: Option<String> = self
            .conn
            .query_row(
                "SELECT path FROM structures WHERE view = ?1 AND structure_id = ?2",
                params![view.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        let json = serde_json::to_string(structure)?;
        self.conn.execute(
            "INSERT INTO structures (view, structure_id, content_id, path, record_json) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(view, structure_id) DO UPDATE SET \
             content_id = excluded.content_id, path = excluded.path, \
             record_json = excluded.record_json",
            params![
                view.as_str(),
                id,
                structure.content_id.0.to_string(),
                structure.path,
                json
            ],
        )?;
        if matches!(previous_path, Some(ref p) if *p != structure.path) {
            self.conn.execute(
                "UPDATE relations SET source_path = ?3 WHERE view = ?1 AND source_id = ?2",
                params![view.as_str(), id, structure.path],
            )?;
            self.conn.execute(
                "UPDATE relations SET target_path = ?3 WHERE view = ?1 AND target_id = ?2",
                params![view.as_str(), id, structure.path],
            )?;
        }
        Ok(())
    }

    fn remove_structure(&mut self, view: View, id: StructureId) -> Result<(), StorageError> {
        let id = id.0.to_string();
        self.conn.execute(
            "DELETE FROM structures WHERE view = ?1 AND structure_id = ?2",
            params![view.as_str(), id],
        )?;
        self.conn.execute(
            "DELETE FROM structure_properties WHERE view = ?1 AND structure_id = ?2",
            params![view.as_str(), id],
        )?;
        self.conn.execute(
            "DELETE FROM relations WHERE view = ?1 AND source_id = ?2",
            params![view.as_str(), id],
        )?;
        self.conn.execute(
            "UPDATE relations SET target_id = NULL WHERE view = ?1 AND target_id = ?2",
            params![view.as_str(), id],
        )?;
        Ok(())
    }

    fn read_content_aspect(
        &self,
        view: View,
        id: ContentId,
    ) -> Result<Option<ContentAspect>, StorageError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM contents WHERE view = ?1 AND content_id = ?2",
                params![view.as_str(), id.0.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write_content_aspect(
        &mut self,
        view: View,
        content: &ContentAspect,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(content)?;
        self.conn.execute(
            "INSERT INTO contents (view, content_id, record_json) VALUES (?1, ?2, ?3) \
             ON CONFLICT(view, content_id) DO UPDATE SET record_json = excluded.record_json",
            params![view.as_str(), content.content_id.0.to_string(), json],
        )?;
        Ok(())
    }

    fn remove_content_aspect(&mut self, view: View, id: ContentId) -> Result<(), StorageError> {
        let id = id.0.to_string();
        for table in ["contents", "content_bytes", "resource_properties"] {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE view = ?1 AND content_id = ?2", table),
                params![view.as_str(), id],
            )?;
        }
        Ok(())
    }

    fn read_content(&self, view: View, id: ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT data FROM content_bytes WHERE view = ?1 AND content_id = ?2",
                params![view.as_str(), id.0.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn write_content(
        &mut self,
        view: View,
        id: ContentId,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO content_bytes (view, content_id, data) VALUES (?1, ?2, ?3) \
             ON CONFLICT(view, content_id) DO UPDATE SET data = excluded.data",
            params![view.as_str(), id.0.to_string(), bytes],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------

    fn read_structure_properties(
        &self,
        view: View,
        id: StructureId,
    ) -> Result<PropertyMap, StorageError> {
        self.query_property_map(
            "SELECT name, value FROM structure_properties WHERE view = ?1 AND structure_id = ?2",
            params![view.as_str(), id.0.to_string()],
        )
    }

    fn read_resource_properties(
        &self,
        view: View,
        id: ContentId,
    ) -> Result<PropertyMap, StorageError> {
        self.query_property_map(
            "SELECT name, value FROM resource_properties WHERE view = ?1 AND content_id = ?2",
            params![view.as_str(), id.0.to_string()],
        )
    }

    fn write_structure_property(
        &mut self,
        view: View,
        id: StructureId,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError> {
        match value {
            Some(value) => self.conn.execute(
                "INSERT INTO structure_properties (view, structure_id, name, value) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(view, structure_id, name) DO UPDATE SET value = excluded.value",
                params![view.as_str(), id.0.to_string(), name, value],
            )?,
            None => self.conn.execute(
                "DELETE FROM structure_properties \
                 WHERE view = ?1 AND structure_id = ?2 AND name = ?3",
                params![view.as_str(), id.0.to_string(), name],
            )?,
        };
        Ok(())
    }

    fn write_resource_property(
        &mut self,
        view: View,
        id: ContentId,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError> {
        match value {
            Some(value) => self.conn.execute(
                "INSERT INTO resource_properties (view, content_id, name, value) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(view, content_id, name) DO UPDATE SET value = excluded.value",
                params![view.as_str(), id.0.to_string(), name, value],
            )?,
            None => self.conn.execute(
                "DELETE FROM resource_properties \
                 WHERE view = ?1 AND content_id = ?2 AND name = ?3",
                params![view.as_str(), id.0.to_string(), name],
            )?,
        };
        Ok(())
    }

    fn replace_structure_properties(
        &mut self,
        view: View,
        id: StructureId,
        properties: &PropertyMap,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM structure_properties WHERE view = ?1 AND structure_id = ?2",
            params![view.as_str(), id.0.to_string()],
        )?;
        for (name, value) in properties {
            self.write_structure_property(view, id, name, Some(value))?;
        }
        Ok(())
    }

    fn replace_resource_properties(
        &mut self,
        view: View,
        id: ContentId,
        properties: &PropertyMap,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM resource_properties WHERE view = ?1 AND content_id = ?2",
            params![view.as_str(), id.0.to_string()],
        )?;
        for (name, value) in properties {
            self.write_resource_property(view, id, name, Some(value))?;
        }
        Ok(())
    }

    fn read_property_definitions(&self) -> Result<Vec<PropertyDefinition>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT record_json FROM property_definitions ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    fn read_property_definition(
        &self,
        name: &str,
    ) -> Result<Option<PropertyDefinition>, StorageError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM property_definitions WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write_property_definition(
        &mut self,
        definition: &PropertyDefinition,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(definition)?;
        self.conn.execute(
            "INSERT INTO property_definitions (name, record_json) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET record_json = excluded.record_json",
            params![definition.name, json],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------

    fn read_relations_from(
        &self,
        view: View,
        source: StructureId,
    ) -> Result<Vec<Relation>, StorageError> {
        self.query_relations(
            "WHERE view = ?1 AND source_id = ?2 ORDER BY target_path, relation_type",
            params![view.as_str(), source.0.to_string()],
        )
    }

    fn read_relations_to(
        &self,
        view: View,
        target: StructureId,
        path: &str,
    ) -> Result<Vec<Relation>, StorageError> {
        self.query_relations(
            "WHERE view = ?1 AND (target_id = ?2 OR (target_id IS NULL AND target_path = ?3)) \
             ORDER BY source_path",
            params![view.as_str(), target.0.to_string(), path],
        )
    }

    fn write_relations(
        &mut self,
        view: View,
        source: StructureId,
        relations: &[Relation],
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM relations WHERE view = ?1 AND source_id = ?2",
            params![view.as_str(), source.0.to_string()],
        )?;
        for relation in relations {
            self.conn.execute(
                "INSERT OR REPLACE INTO relations \
                 (view, source_id, source_path, target_id, target_path, relation_type) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    view.as_str(),
                    source.0.to_string(),
                    relation.source_path,
                    relation.target.id().map(|id| id.0.to_string()),
                    relation.target.path(),
                    relation_type_to_str(relation.relation_type)
                ],
            )?;
        }
        Ok(())
    }

    fn retarget_relations(
        &mut self,
        view: View,
        path: &str,
        target: Option<StructureId>,
    ) -> Result<usize, StorageError> {
        let touched = self.conn.execute(
            "UPDATE relations SET target_id = ?3 WHERE view = ?1 AND target_path = ?2",
            params![view.as_str(), path, target.map(|id| id.0.to_string())],
        )?;
        Ok(touched)
    }

    // -------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------

    fn write_history_entry(&mut self, entry: &HistoryEntry) -> Result<(), StorageError> {
        let json = serde_json::to_string(entry)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO history \
             (structure_id, publish_tag, content_id, path, deleted, content_hash, record_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.structure_id.0.to_string(),
                entry.publish_tag.0 as i64,
                entry.content_id.0.to_string(),
                entry.path,
                entry.deleted,
                entry.content_hash,
                json
            ],
        )?;
        Ok(())
    }

    fn write_history_content(&mut self, hash: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO history_contents (content_hash, data) VALUES (?1, ?2)",
            params![hash, bytes],
        )?;
        Ok(())
    }

    fn read_history_content(&self, hash: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT data FROM history_contents WHERE content_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn read_history_by_content(
        &self,
        content_id: ContentId,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        self.query_history(
            "WHERE content_id = ?1",
            params![content_id.0.to_string()],
        )
    }

    fn read_history_by_structure(
        &self,
        structure_id: StructureId,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        self.query_history(
            "WHERE structure_id = ?1",
            params![structure_id.0.to_string()],
        )
    }

    fn read_deleted_history(
        &self,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let all = self.query_history(
            "WHERE deleted = 1 AND substr(path, 1, length(?1)) = ?1 AND path <> ?1",
            params![folder],
        )?;
        if recursive {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|e| path::is_direct_child(&e.path, folder))
            .collect())
    }

    fn read_history_content_ids(&self) -> Result<Vec<ContentId>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT content_id FROM history ORDER BY content_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(ContentId(parse_uuid(&row?)?));
        }
        Ok(result)
    }

    fn delete_history_entry(
        &mut self,
        structure_id: StructureId,
        tag: PublishTag,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM history WHERE structure_id = ?1 AND publish_tag = ?2",
            params![structure_id.0.to_string(), tag.0 as i64],
        )?;
        Ok(())
    }

    fn delete_unreferenced_history_contents(&mut self) -> Result<usize, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM history_contents \
             WHERE content_hash NOT IN (SELECT content_hash FROM history)",
            [],
        )?;
        Ok(removed)
    }

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    fn write_project(&mut self, project: &Project) -> Result<(), StorageError> {
        let json = serde_json::to_string(project)?;
        self.conn.execute(
            "INSERT INTO projects (project_id, name, record_json) VALUES (?1, ?2, ?3) \
             ON CONFLICT(project_id) DO UPDATE SET \
             name = excluded.name, record_json = excluded.record_json",
            params![project.id.0.to_string(), project.name, json],
        )?;
        Ok(())
    }

    fn read_project(&self, id: ProjectId) -> Result<Option<Project>, StorageError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM projects WHERE project_id = ?1",
                params![id.0.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn read_projects(&self) -> Result<Vec<Project>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT record_json FROM projects ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    // -------------------------------------------------------------------
    // Publish jobs and counters
    // -------------------------------------------------------------------

    fn write_publish_job(&mut self, record: &PublishJobRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&record.payload)?;
        self.conn.execute(
            "INSERT INTO publish_jobs (job_id, sequence, state, payload_json) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(job_id) DO UPDATE SET \
             sequence = excluded.sequence, state = excluded.state, \
             payload_json = excluded.payload_json",
            params![
                record.id.0.to_string(),
                record.sequence as i64,
                record.state.as_str(),
                payload
            ],
        )?;
        Ok(())
    }

    fn read_publish_jobs(&self) -> Result<Vec<PublishJobRecord>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT job_id, sequence, state, payload_json FROM publish_jobs ORDER BY sequence",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (id, sequence, state, payload) = row?;
            let state = PublishJobState::parse(&state).ok_or_else(|| {
                StorageError::integrity(format!("unknown publish job state '{}'", state))
            })?;
            result.push(PublishJobRecord {
                id: PublishJobId(parse_uuid(&id)?),
                sequence: sequence as u64,
                state,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(result)
    }

    fn delete_publish_job(&mut self, id: PublishJobId) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM publish_jobs WHERE job_id = ?1",
            params![id.0.to_string()],
        )?;
        Ok(())
    }

    fn read_counter(&self, name: &str) -> Result<u64, StorageError> {
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM counters WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0) as u64)
    }

    fn write_counter(&mut self, name: &str, value: u64) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO counters (name, value) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;
    use crate::test_support::{content_aspect, history_entry, structure_aspect};

    fn store_with(paths: &[&str]) -> (SqliteStore, ContentId) {
        let mut store = SqliteStore::in_memory().unwrap();
        let content = content_aspect();
        store.write_content_aspect(View::Offline, &content).unwrap();
        for p in paths {
            store
                .write_structure(View::Offline, &structure_aspect(p, content.content_id))
                .unwrap();
        }
        (store, content.content_id)
    }

    #[test]
    fn test_resource_roundtrip_with_sibling_count() {
        let (store, content_id) = store_with(&["/a", "/b"]);
        let a = store
            .read_resource_by_path(View::Offline, "/a")
            .unwrap()
            .unwrap();
        assert_eq!(a.content_id(), content_id);
        assert_eq!(a.sibling_count, 2);
        assert_eq!(store.read_siblings(View::Offline, content_id).unwrap().len(), 2);
    }

    #[test]
    fn test_subtree_uses_prefix_match() {
        let (store, _) = store_with(&["/f/", "/f/a", "/f/g/", "/f/g/b", "/fa"]);
        let direct = store.read_subtree(View::Offline, "/f/", false).unwrap();
        let paths: Vec<&str> = direct.iter().map(|r| r.path()).collect();
        assert_eq!(paths, vec!["/f/a", "/f/g/"]);
        assert_eq!(store.read_subtree(View::Offline, "/f/", true).unwrap().len(), 3);
    }

    #[test]
    fn test_path_collision_is_integrity_error() {
        let (mut store, content_id) = store_with(&["/a"]);
        let err = store
            .write_structure(View::Offline, &structure_aspect("/a", content_id))
            .unwrap_err();
        assert!(matches!(err, StorageError::IntegrityError { .. }));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (mut store, _) = store_with(&[]);
        store.begin().unwrap();
        store.write_counter("publish_tag", 9).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.read_counter("publish_tag").unwrap(), 0);
        assert!(store.rollback().is_err());
    }

    #[test]
    fn test_history_blobs_are_shared_and_collected() {
        let (mut store, content_id) = store_with(&[]);
        let hash = content_hash(b"v1");
        let first = history_entry(content_id, "/x", 1, &hash);
        let second = history_entry(content_id, "/x", 2, &hash);
        store.write_history_content(&hash, b"v1").unwrap();
        store.write_history_content(&hash, b"v1").unwrap();
        store.write_history_entry(&first).unwrap();
        store.write_history_entry(&second).unwrap();

        assert_eq!(store.read_history_by_content(content_id).unwrap().len(), 2);
        store
            .delete_history_entry(first.structure_id, first.publish_tag)
            .unwrap();
        assert_eq!(store.delete_unreferenced_history_contents().unwrap(), 0);
        store
            .delete_history_entry(second.structure_id, second.publish_tag)
            .unwrap();
        assert_eq!(store.delete_unreferenced_history_contents().unwrap(), 1);
        assert!(store.read_history_content(&hash).unwrap().is_none());
    }

    #[test]
    fn test_deleted_history_filter() {
        let (mut store, content_id) = store_with(&[]);
        let mut direct = history_entry(content_id, "/f/x", 1, "h");
        direct.deleted = true;
        let mut nested = history_entry(content_id, "/f/g/y", 1, "h");
        nested.deleted = true;
        let live = history_entry(content_id, "/f/z", 1, "h");
        for e in [&direct, &nested, &live] {
            store.write_history_entry(e).unwrap();
        }
        assert_eq!(store.read_deleted_history("/f/", false).unwrap().len(), 1);
        assert_eq!(store.read_deleted_history("/f/", true).unwrap().len(), 2);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.db");
        let path = path.to_str().unwrap();
        {
            let mut store = SqliteStore::new(path).unwrap();
            store.write_counter("publish_tag", 3).unwrap();
        }
        let store = SqliteStore::new(path).unwrap();
        assert_eq!(store.read_counter("publish_tag").unwrap(), 3);
    }
}
