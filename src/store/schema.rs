//! Table layout and schema templates.
//!
//! A template is an empty redb file carrying every table plus a
//! `schema_meta` table that identifies the format and version. New stores are
//! instantiated by copying a template and clearing its data tables.

use std::path::Path;

use redb::{
    Database, Key, ReadTransaction, ReadableTable, TableDefinition, TableHandle, Value,
    WriteTransaction,
};

use crate::error::{SchemaError, persistence};

use super::StoreResult;

/// Node rows: id → bincode `NodeRecord`.
pub(crate) const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");
/// Edge rows: id → bincode `EdgeRecord`.
pub(crate) const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");
/// (node id, key) → bincode `StoredValue`.
pub(crate) const NODE_PROPERTIES: TableDefinition<(u64, &str), &[u8]> =
    TableDefinition::new("node_properties");
/// (edge id, key) → bincode `StoredValue`.
pub(crate) const EDGE_PROPERTIES: TableDefinition<(u64, &str), &[u8]> =
    TableDefinition::new("edge_properties");
/// Unique label → node id.
pub(crate) const NODE_LABELS: TableDefinition<&str, u64> = TableDefinition::new("node_labels");
/// (source node id, edge id) adjacency.
pub(crate) const EDGES_BY_SOURCE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("edges_by_source");
/// (target node id, edge id) adjacency.
pub(crate) const EDGES_BY_TARGET: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("edges_by_target");
/// Format identification.
pub(crate) const SCHEMA_META: TableDefinition<&str, &str> = TableDefinition::new("schema_meta");

const FORMAT_KEY: &str = "format";
const VERSION_KEY: &str = "version";

/// Value of the `format` meta key.
pub const SCHEMA_FORMAT: &str = "concept-graph";
/// Value of the `version` meta key.
pub const SCHEMA_VERSION: &str = "1";

/// Creation and verification of the store schema.
pub struct SchemaTemplate;

impl SchemaTemplate {
    /// Write an empty template file at `path`.
    pub fn write(path: &Path) -> StoreResult<()> {
        let db = Database::create(path)
            .map_err(persistence(format!("create template {}", path.display())))?;
        Self::initialize(&db)?;
        tracing::info!(path = %path.display(), version = SCHEMA_VERSION, "wrote schema template");
        Ok(())
    }

    /// Create every table and stamp the format/version.
    pub(crate) fn initialize(db: &Database) -> StoreResult<()> {
        let txn = db.begin_write().map_err(persistence("begin_write"))?;
        create_table(&txn, NODES)?;
        create_table(&txn, EDGES)?;
        create_table(&txn, NODE_PROPERTIES)?;
        create_table(&txn, EDGE_PROPERTIES)?;
        create_table(&txn, NODE_LABELS)?;
        create_table(&txn, EDGES_BY_SOURCE)?;
        create_table(&txn, EDGES_BY_TARGET)?;
        {
            let mut meta = txn
                .open_table(SCHEMA_META)
                .map_err(persistence("open schema_meta"))?;
            meta.insert(FORMAT_KEY, SCHEMA_FORMAT)
                .map_err(persistence("write schema format"))?;
            meta.insert(VERSION_KEY, SCHEMA_VERSION)
                .map_err(persistence("write schema version"))?;
        }
        txn.commit().map_err(persistence("commit schema"))?;
        Ok(())
    }

    /// Check that `db` carries this crate's schema at the current version.
    pub(crate) fn verify(db: &Database, path: &Path) -> Result<(), SchemaError> {
        let malformed = |reason: String| SchemaError::Malformed {
            path: path.display().to_string(),
            reason,
        };

        let txn = db
            .begin_read()
            .map_err(|e| malformed(format!("cannot read: {e}")))?;
        let (format, version) = {
            let meta = txn
                .open_table(SCHEMA_META)
                .map_err(|e| malformed(format!("schema_meta: {e}")))?;
            let read = |key: &str| -> Result<Option<String>, SchemaError> {
                meta.get(key)
                    .map(|v| v.map(|guard| guard.value().to_owned()))
                    .map_err(|e| malformed(format!("schema_meta.{key}: {e}")))
            };
            (read(FORMAT_KEY)?, read(VERSION_KEY)?)
        };

        match format.as_deref() {
            Some(SCHEMA_FORMAT) => {}
            Some(other) => return Err(malformed(format!("unknown format {other:?}"))),
            None => return Err(malformed("no format marker".into())),
        }
        let found = version.unwrap_or_default();
        if found != SCHEMA_VERSION {
            return Err(SchemaError::VersionMismatch {
                path: path.display().to_string(),
                found,
                expected: SCHEMA_VERSION.to_owned(),
            });
        }

        require_table(&txn, NODES, path)?;
        require_table(&txn, EDGES, path)?;
        require_table(&txn, NODE_PROPERTIES, path)?;
        require_table(&txn, EDGE_PROPERTIES, path)?;
        require_table(&txn, NODE_LABELS, path)?;
        require_table(&txn, EDGES_BY_SOURCE, path)?;
        require_table(&txn, EDGES_BY_TARGET, path)?;
        Ok(())
    }

    /// Drop every data row, keeping the schema and its meta table.
    pub(crate) fn clear_data(db: &Database) -> StoreResult<()> {
        let txn = db.begin_write().map_err(persistence("begin_write"))?;
        reset_table(&txn, NODES)?;
        reset_table(&txn, EDGES)?;
        reset_table(&txn, NODE_PROPERTIES)?;
        reset_table(&txn, EDGE_PROPERTIES)?;
        reset_table(&txn, NODE_LABELS)?;
        reset_table(&txn, EDGES_BY_SOURCE)?;
        reset_table(&txn, EDGES_BY_TARGET)?;
        txn.commit().map_err(persistence("commit clear"))?;
        Ok(())
    }
}

fn create_table<K: Key + 'static, V: Value + 'static>(
    txn: &WriteTransaction,
    table: TableDefinition<K, V>,
) -> StoreResult<()> {
    txn.open_table(table)
        .map(drop)
        .map_err(persistence(format!("create table {}", table.name())))
}

fn reset_table<K: Key + 'static, V: Value + 'static>(
    txn: &WriteTransaction,
    table: TableDefinition<K, V>,
) -> StoreResult<()> {
    txn.delete_table(table)
        .map_err(persistence(format!("delete table {}", table.name())))?;
    create_table(txn, table)
}

fn require_table<K: Key + 'static, V: Value + 'static>(
    txn: &ReadTransaction,
    table: TableDefinition<K, V>,
    path: &Path,
) -> Result<(), SchemaError> {
    txn.open_table(table)
        .map(drop)
        .map_err(|e| SchemaError::Malformed {
            path: path.display().to_string(),
            reason: format!("table {}: {e}", table.name()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn written_template_verifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template.redb");
        SchemaTemplate::write(&path).unwrap();

        let db = Database::open(&path).unwrap();
        SchemaTemplate::verify(&db, &path).unwrap();
    }

    #[test]
    fn foreign_database_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.redb");
        let db = Database::create(&path).unwrap();
        let err = SchemaTemplate::verify(&db, &path).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { .. }));
    }

    #[test]
    fn wrong_version_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.redb");
        let db = Database::create(&path).unwrap();
        SchemaTemplate::initialize(&db).unwrap();
        {
            let txn = db.begin_write().unwrap();
            {
                let mut meta = txn.open_table(SCHEMA_META).unwrap();
                meta.insert(VERSION_KEY, "0").unwrap();
            }
            txn.commit().unwrap();
        }
        let err = SchemaTemplate::verify(&db, &path).unwrap_err();
        assert!(matches!(err, SchemaError::VersionMismatch { found, .. } if found == "0"));
    }

    #[test]
    fn clear_keeps_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.redb");
        let db = Database::create(&path).unwrap();
        SchemaTemplate::initialize(&db).unwrap();
        {
            let txn = db.begin_write().unwrap();
            {
                let mut labels = txn.open_table(NODE_LABELS).unwrap();
                labels.insert("cat", 1).unwrap();
            }
            txn.commit().unwrap();
        }

        SchemaTemplate::clear_data(&db).unwrap();
        SchemaTemplate::verify(&db, &path).unwrap();
        let txn = db.begin_read().unwrap();
        let labels = txn.open_table(NODE_LABELS).unwrap();
        assert!(labels.get("cat").unwrap().is_none());
    }
}
