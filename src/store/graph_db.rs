//! Relational store of nodes, edges and their properties.
//!
//! Every public mutation runs in a single redb write transaction, writing the
//! parent row before its property and adjacency rows. Node and edge rows go
//! through a [`RecordMapper`], so repeated reads of the same row share one
//! cached instance.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::error::{KbResult, SchemaError, StoreError, persistence};
use crate::graph::RelationKind;
use crate::property::PropertySet;

use super::StoreResult;
use super::record::{
    Record, RecordMapper, SaveOutcome, clear_properties, decode, read_properties, write_properties,
};
use super::schema::{
    EDGE_PROPERTIES, EDGES, EDGES_BY_SOURCE, EDGES_BY_TARGET, NODE_LABELS, NODE_PROPERTIES, NODES,
    SchemaTemplate,
};

/// Row form of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u64,
    pub label: String,
}

impl Record for NodeRecord {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = NODES;
    const ENTITY: &'static str = "node";

    fn id(&self) -> u64 {
        self.id
    }
}

/// Row form of an edge. The kind is stored by its canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: u64,
    pub source_id: u64,
    pub kind: String,
    pub target_id: u64,
}

impl Record for EdgeRecord {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = EDGES;
    const ENTITY: &'static str = "edge";

    fn id(&self) -> u64 {
        self.id
    }
}

/// A node with its properties, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub id: u64,
    pub label: String,
    pub properties: PropertySet,
}

/// An edge with its properties, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub id: u64,
    pub source: u64,
    pub kind: RelationKind,
    pub target: u64,
    pub properties: PropertySet,
}

impl StoredEdge {
    fn from_record(record: &EdgeRecord, properties: PropertySet) -> Self {
        Self {
            id: record.id,
            source: record.source_id,
            kind: RelationKind::parse(&record.kind),
            target: record.target_id,
            properties,
        }
    }
}

/// redb-backed graph store.
pub struct GraphDatabase {
    path: PathBuf,
    db: Arc<Database>,
    nodes: RecordMapper<NodeRecord>,
    edges: RecordMapper<EdgeRecord>,
}

impl GraphDatabase {
    fn from_database(path: &Path, db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            path: path.to_path_buf(),
            nodes: RecordMapper::new(Arc::clone(&db)),
            edges: RecordMapper::new(Arc::clone(&db)),
            db,
        }
    }

    /// Create a new store at `path` with the built-in schema. Refuses to
    /// touch an existing file.
    pub fn create(path: &Path) -> KbResult<Self> {
        if path.exists() {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            }
            .into());
        }
        let db = Database::create(path)
            .map_err(persistence(format!("create store {}", path.display())))?;
        SchemaTemplate::initialize(&db)?;
        SchemaTemplate::verify(&db, path)?;
        tracing::info!(path = %path.display(), "created graph store");
        Ok(Self::from_database(path, db))
    }

    /// Open and verify an existing store.
    pub fn open(path: &Path) -> KbResult<Self> {
        if !path.exists() {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
            .into());
        }
        let db = Database::open(path).map_err(|e| SchemaError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        SchemaTemplate::verify(&db, path)?;
        tracing::debug!(path = %path.display(), "opened graph store");
        Ok(Self::from_database(path, db))
    }

    /// Create a store at `target` by copying `template`. Every data table is
    /// cleared after the copy, so rows a template may have accumulated are
    /// never carried over.
    pub fn instantiate(template: &Path, target: &Path) -> KbResult<Self> {
        if !template.exists() {
            return Err(SchemaError::Missing {
                path: template.display().to_string(),
            }
            .into());
        }
        {
            let db = Database::open(template).map_err(|e| SchemaError::Malformed {
                path: template.display().to_string(),
                reason: e.to_string(),
            })?;
            SchemaTemplate::verify(&db, template)?;
        }

        std::fs::copy(template, target).map_err(|source| SchemaError::Copy {
            template: template.display().to_string(),
            target: target.display().to_string(),
            source,
        })?;

        let store = Self::open(target)?;
        store.clear()?;
        tracing::info!(
            template = %template.display(),
            target = %target.display(),
            "instantiated graph store from template"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying database, for custom table operations.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Insert a node with a store-assigned id. Labels are unique.
    pub fn create_node(&self, label: &str, properties: &PropertySet) -> StoreResult<u64> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        if let Some(existing_id) = label_owner(&txn, label)? {
            txn.abort().map_err(persistence("abort"))?;
            return Err(StoreError::DuplicateLabel {
                label: label.to_owned(),
                existing_id,
            });
        }
        let id = next_id(&txn, NODES)?;
        self.write_node(&txn, id, label, properties)?;
        txn.commit()
            .map_err(persistence(format!("commit node {id}")))?;
        Ok(id)
    }

    /// Insert or replace a node under a caller-assigned id.
    pub fn put_node(
        &self,
        id: u64,
        label: &str,
        properties: &PropertySet,
    ) -> StoreResult<SaveOutcome> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        if let Some(existing_id) = label_owner(&txn, label)? {
            if existing_id != id {
                txn.abort().map_err(persistence("abort"))?;
                return Err(StoreError::DuplicateLabel {
                    label: label.to_owned(),
                    existing_id,
                });
            }
        }
        if let Some(previous) = read_row::<NodeRecord>(&txn, id)? {
            if previous.label != label {
                let mut labels = txn
                    .open_table(NODE_LABELS)
                    .map_err(persistence("open node_labels"))?;
                labels
                    .remove(previous.label.as_str())
                    .map_err(persistence(format!("release label {:?}", previous.label)))?;
            }
        }
        let outcome = self.write_node(&txn, id, label, properties)?;
        txn.commit()
            .map_err(persistence(format!("commit node {id}")))?;
        tracing::debug!(id, label, ?outcome, "stored node");
        Ok(outcome)
    }

    /// Rewrite several nodes in one transaction. Every old label in the
    /// batch is released before any new one is claimed, so labels may move
    /// between nodes of the batch, swaps included. Nothing is written if any
    /// new label belongs to a node outside the batch.
    pub fn relabel_nodes(&self, nodes: &[(u64, &str, &PropertySet)]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        let mut previous = Vec::with_capacity(nodes.len());
        for &(id, _, _) in nodes {
            if let Some(record) = read_row::<NodeRecord>(&txn, id)? {
                previous.push((id, record.label));
            }
        }
        {
            let mut labels = txn
                .open_table(NODE_LABELS)
                .map_err(persistence("open node_labels"))?;
            for (id, label) in &previous {
                let owner = labels
                    .get(label.as_str())
                    .map_err(persistence(format!("look up label {label:?}")))?
                    .map(|guard| guard.value());
                if owner == Some(*id) {
                    labels
                        .remove(label.as_str())
                        .map_err(persistence(format!("release label {label:?}")))?;
                }
            }
        }
        for &(id, label, properties) in nodes {
            if let Some(existing_id) = label_owner(&txn, label)? {
                if existing_id != id {
                    txn.abort().map_err(persistence("abort"))?;
                    return Err(StoreError::DuplicateLabel {
                        label: label.to_owned(),
                        existing_id,
                    });
                }
            }
            self.write_node(&txn, id, label, properties)?;
        }
        txn.commit()
            .map_err(persistence(format!("commit relabel of {} node(s)", nodes.len())))?;
        tracing::debug!(nodes = nodes.len(), "relabeled nodes");
        Ok(())
    }

    /// Label currently stored for node `id`, if the node exists.
    pub fn stored_label(&self, id: u64) -> StoreResult<Option<String>> {
        Ok(self.nodes.find(id)?.map(|record| record.label.clone()))
    }

    fn write_node(
        &self,
        txn: &WriteTransaction,
        id: u64,
        label: &str,
        properties: &PropertySet,
    ) -> StoreResult<SaveOutcome> {
        let record = NodeRecord {
            id,
            label: label.to_owned(),
        };
        let outcome = self.nodes.save_in(txn, &record)?;
        {
            let mut labels = txn
                .open_table(NODE_LABELS)
                .map_err(persistence("open node_labels"))?;
            labels
                .insert(label, id)
                .map_err(persistence(format!("index label {label:?}")))?;
        }
        write_properties(txn, NODE_PROPERTIES, id, properties, NodeRecord::ENTITY)?;
        Ok(outcome)
    }

    pub fn get_node(&self, id: u64) -> StoreResult<StoredNode> {
        let record = self.nodes.load(id)?;
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let props = txn
            .open_table(NODE_PROPERTIES)
            .map_err(persistence("open node_properties"))?;
        Ok(StoredNode {
            id,
            label: record.label.clone(),
            properties: read_properties(&props, id, NodeRecord::ENTITY)?,
        })
    }

    pub fn find_node_by_label(&self, label: &str) -> StoreResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let labels = txn
            .open_table(NODE_LABELS)
            .map_err(persistence("open node_labels"))?;
        let id = labels
            .get(label)
            .map_err(persistence(format!("look up label {label:?}")))?
            .map(|guard| guard.value());
        Ok(id)
    }

    /// Delete a node. Fails while any edge still references it; edges are
    /// never removed implicitly.
    pub fn delete_node(&self, id: u64) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        let Some(record) = read_row::<NodeRecord>(&txn, id)? else {
            txn.abort().map_err(persistence("abort"))?;
            return Err(StoreError::NotFound {
                entity: NodeRecord::ENTITY,
                id,
            });
        };

        let incident: BTreeSet<u64> = {
            let by_source = txn
                .open_table(EDGES_BY_SOURCE)
                .map_err(persistence("open edges_by_source"))?;
            let by_target = txn
                .open_table(EDGES_BY_TARGET)
                .map_err(persistence("open edges_by_target"))?;
            let mut ids = adjacent(&by_source, id)?;
            ids.extend(adjacent(&by_target, id)?);
            ids.into_iter().collect()
        };
        if !incident.is_empty() {
            txn.abort().map_err(persistence("abort"))?;
            return Err(StoreError::NodeInUse {
                id,
                label: record.label,
                edges: incident.len(),
            });
        }

        self.nodes.delete_in(&txn, id)?;
        {
            let mut labels = txn
                .open_table(NODE_LABELS)
                .map_err(persistence("open node_labels"))?;
            labels
                .remove(record.label.as_str())
                .map_err(persistence(format!("release label {:?}", record.label)))?;
        }
        clear_properties(&txn, NODE_PROPERTIES, id, NodeRecord::ENTITY)?;
        txn.commit()
            .map_err(persistence(format!("commit delete node {id}")))?;
        tracing::debug!(id, label = %record.label, "deleted node");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Insert an edge with a store-assigned id. Both endpoints must exist.
    pub fn create_edge(
        &self,
        source: u64,
        kind: &RelationKind,
        target: u64,
        properties: &PropertySet,
    ) -> StoreResult<u64> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        let id = next_id(&txn, EDGES)?;
        if let Err(e) = require_endpoints(&txn, id, source, target) {
            txn.abort().map_err(persistence("abort"))?;
            return Err(e);
        }
        self.write_edge(&txn, id, source, kind, target, properties)?;
        txn.commit()
            .map_err(persistence(format!("commit edge {id}")))?;
        Ok(id)
    }

    /// Insert or replace an edge under a caller-assigned id.
    pub fn put_edge(
        &self,
        id: u64,
        source: u64,
        kind: &RelationKind,
        target: u64,
        properties: &PropertySet,
    ) -> StoreResult<SaveOutcome> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        if let Err(e) = require_endpoints(&txn, id, source, target) {
            txn.abort().map_err(persistence("abort"))?;
            return Err(e);
        }
        if let Some(previous) = read_row::<EdgeRecord>(&txn, id)? {
            unlink_edge(&txn, &previous)?;
        }
        let outcome = self.write_edge(&txn, id, source, kind, target, properties)?;
        txn.commit()
            .map_err(persistence(format!("commit edge {id}")))?;
        tracing::debug!(id, source, %kind, target, ?outcome, "stored edge");
        Ok(outcome)
    }

    fn write_edge(
        &self,
        txn: &WriteTransaction,
        id: u64,
        source: u64,
        kind: &RelationKind,
        target: u64,
        properties: &PropertySet,
    ) -> StoreResult<SaveOutcome> {
        let record = EdgeRecord {
            id,
            source_id: source,
            kind: kind.as_str().to_owned(),
            target_id: target,
        };
        let outcome = self.edges.save_in(txn, &record)?;
        {
            let mut by_source = txn
                .open_table(EDGES_BY_SOURCE)
                .map_err(persistence("open edges_by_source"))?;
            by_source
                .insert((source, id), ())
                .map_err(persistence(format!("link edge {id} from {source}")))?;
            let mut by_target = txn
                .open_table(EDGES_BY_TARGET)
                .map_err(persistence("open edges_by_target"))?;
            by_target
                .insert((target, id), ())
                .map_err(persistence(format!("link edge {id} to {target}")))?;
        }
        write_properties(txn, EDGE_PROPERTIES, id, properties, EdgeRecord::ENTITY)?;
        Ok(outcome)
    }

    pub fn get_edge(&self, id: u64) -> StoreResult<StoredEdge> {
        let record = self.edges.load(id)?;
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let props = txn
            .open_table(EDGE_PROPERTIES)
            .map_err(persistence("open edge_properties"))?;
        let properties = read_properties(&props, id, EdgeRecord::ENTITY)?;
        Ok(StoredEdge::from_record(&record, properties))
    }

    /// Outgoing edges of a node, ordered by edge id.
    pub fn get_edges_from(&self, node: u64) -> StoreResult<Vec<StoredEdge>> {
        let ids = {
            let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
            let by_source = txn
                .open_table(EDGES_BY_SOURCE)
                .map_err(persistence("open edges_by_source"))?;
            adjacent(&by_source, node)?
        };
        ids.into_iter().map(|id| self.get_edge(id)).collect()
    }

    /// Incoming edges of a node, ordered by edge id.
    pub fn get_edges_to(&self, node: u64) -> StoreResult<Vec<StoredEdge>> {
        let ids = {
            let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
            let by_target = txn
                .open_table(EDGES_BY_TARGET)
                .map_err(persistence("open edges_by_target"))?;
            adjacent(&by_target, node)?
        };
        ids.into_iter().map(|id| self.get_edge(id)).collect()
    }

    pub fn delete_edge(&self, id: u64) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        let Some(record) = read_row::<EdgeRecord>(&txn, id)? else {
            txn.abort().map_err(persistence("abort"))?;
            return Err(StoreError::NotFound {
                entity: EdgeRecord::ENTITY,
                id,
            });
        };
        unlink_edge(&txn, &record)?;
        self.edges.delete_in(&txn, id)?;
        clear_properties(&txn, EDGE_PROPERTIES, id, EdgeRecord::ENTITY)?;
        txn.commit()
            .map_err(persistence(format!("commit delete edge {id}")))?;
        tracing::debug!(id, "deleted edge");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bulk
    // -----------------------------------------------------------------------

    /// Every node with its properties, ordered by id, from one snapshot.
    pub fn load_all_nodes(&self) -> StoreResult<Vec<StoredNode>> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let rows = txn.open_table(NODES).map_err(persistence("open nodes"))?;
        let props = txn
            .open_table(NODE_PROPERTIES)
            .map_err(persistence("open node_properties"))?;
        let mut nodes = Vec::new();
        for entry in rows.iter().map_err(persistence("scan nodes"))? {
            let (key, value) = entry.map_err(persistence("scan nodes"))?;
            let id = key.value();
            let record: NodeRecord = decode(NodeRecord::ENTITY, id, value.value())?;
            nodes.push(StoredNode {
                id,
                label: record.label,
                properties: read_properties(&props, id, NodeRecord::ENTITY)?,
            });
        }
        Ok(nodes)
    }

    /// Every edge with its properties, ordered by id, from one snapshot.
    pub fn load_all_edges(&self) -> StoreResult<Vec<StoredEdge>> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let rows = txn.open_table(EDGES).map_err(persistence("open edges"))?;
        let props = txn
            .open_table(EDGE_PROPERTIES)
            .map_err(persistence("open edge_properties"))?;
        let mut edges = Vec::new();
        for entry in rows.iter().map_err(persistence("scan edges"))? {
            let (key, value) = entry.map_err(persistence("scan edges"))?;
            let id = key.value();
            let record: EdgeRecord = decode(EdgeRecord::ENTITY, id, value.value())?;
            let properties = read_properties(&props, id, EdgeRecord::ENTITY)?;
            edges.push(StoredEdge::from_record(&record, properties));
        }
        Ok(edges)
    }

    pub fn node_count(&self) -> StoreResult<u64> {
        self.nodes.count()
    }

    pub fn edge_count(&self) -> StoreResult<u64> {
        self.edges.count()
    }

    /// Largest stored node and edge ids.
    pub fn max_ids(&self) -> StoreResult<(Option<u64>, Option<u64>)> {
        Ok((self.nodes.max_id()?, self.edges.max_id()?))
    }

    /// Drop every data row, keeping the schema.
    pub fn clear(&self) -> StoreResult<()> {
        SchemaTemplate::clear_data(&self.db)?;
        self.nodes.clear_cache();
        self.edges.clear_cache();
        tracing::info!(path = %self.path.display(), "cleared graph store");
        Ok(())
    }

    /// Reclaim free pages. Consumes the handle because redb needs exclusive
    /// access; returns the reopened store and whether anything was compacted.
    pub fn compact(self) -> StoreResult<(Self, bool)> {
        let GraphDatabase {
            path,
            db,
            nodes,
            edges,
        } = self;
        drop(nodes);
        drop(edges);
        let mut db = Arc::try_unwrap(db).map_err(|_| StoreError::Persistence {
            context: format!("compact {}", path.display()),
            message: "database handle is still shared".into(),
        })?;
        let compacted = db
            .compact()
            .map_err(persistence(format!("compact {}", path.display())))?;
        tracing::info!(path = %path.display(), compacted, "compacted graph store");
        Ok((Self::from_database(&path, db), compacted))
    }
}

impl std::fmt::Debug for GraphDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDatabase")
            .field("path", &self.path)
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

fn next_id(txn: &WriteTransaction, table: TableDefinition<'static, u64, &'static [u8]>) -> StoreResult<u64> {
    let rows = txn.open_table(table).map_err(persistence("open table"))?;
    let last = rows.last().map_err(persistence("scan for last id"))?;
    let max = last.map(|(key, _)| key.value()).unwrap_or(0);
    max.checked_add(1).ok_or(StoreError::Persistence {
        context: "allocate id".into(),
        message: "id space exhausted".into(),
    })
}

fn read_row<R: Record>(txn: &WriteTransaction, id: u64) -> StoreResult<Option<R>> {
    let rows = txn
        .open_table(R::TABLE)
        .map_err(persistence(format!("open {} table", R::ENTITY)))?;
    let row = rows
        .get(id)
        .map_err(persistence(format!("read {} {id}", R::ENTITY)))?;
    row.map(|guard| decode(R::ENTITY, id, guard.value()))
        .transpose()
}

fn label_owner(txn: &WriteTransaction, label: &str) -> StoreResult<Option<u64>> {
    let labels = txn
        .open_table(NODE_LABELS)
        .map_err(persistence("open node_labels"))?;
    let owner = labels
        .get(label)
        .map_err(persistence(format!("look up label {label:?}")))?
        .map(|guard| guard.value());
    Ok(owner)
}

fn require_endpoints(txn: &WriteTransaction, edge_id: u64, source: u64, target: u64) -> StoreResult<()> {
    let rows = txn.open_table(NODES).map_err(persistence("open nodes"))?;
    for (role, node_id) in [("source", source), ("target", target)] {
        let present = rows
            .get(node_id)
            .map_err(persistence(format!("read node {node_id}")))?
            .is_some();
        if !present {
            return Err(StoreError::DanglingEdge {
                edge_id,
                role,
                node_id,
            });
        }
    }
    Ok(())
}

fn unlink_edge(txn: &WriteTransaction, record: &EdgeRecord) -> StoreResult<()> {
    let mut by_source = txn
        .open_table(EDGES_BY_SOURCE)
        .map_err(persistence("open edges_by_source"))?;
    by_source
        .remove((record.source_id, record.id))
        .map_err(persistence(format!("unlink edge {}", record.id)))?;
    let mut by_target = txn
        .open_table(EDGES_BY_TARGET)
        .map_err(persistence("open edges_by_target"))?;
    by_target
        .remove((record.target_id, record.id))
        .map_err(persistence(format!("unlink edge {}", record.id)))?;
    Ok(())
}

/// Edge ids listed under `node` in an adjacency table.
fn adjacent<T>(table: &T, node: u64) -> StoreResult<Vec<u64>>
where
    T: ReadableTable<(u64, u64), ()>,
{
    let mut ids = Vec::new();
    for entry in table
        .range((node, 0u64)..=(node, u64::MAX))
        .map_err(persistence(format!("scan adjacency of node {node}")))?
    {
        let (key, _) = entry.map_err(persistence(format!("scan adjacency of node {node}")))?;
        ids.push(key.value().1);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, GraphDatabase) {
        let dir = TempDir::new().unwrap();
        let db = GraphDatabase::create(&dir.path().join("graph.redb")).unwrap();
        (dir, db)
    }

    #[test]
    fn node_crud() {
        let (_dir, db) = store();
        let props = PropertySet::new().with("occurrences", 3);
        let id = db.create_node("cat", &props).unwrap();
        assert_eq!(id, 1);

        let node = db.get_node(id).unwrap();
        assert_eq!(node.label, "cat");
        assert_eq!(node.properties, props);
        assert_eq!(db.find_node_by_label("cat").unwrap(), Some(id));
        assert_eq!(db.find_node_by_label("dog").unwrap(), None);

        db.delete_node(id).unwrap();
        assert!(matches!(
            db.get_node(id).unwrap_err(),
            StoreError::NotFound { entity: "node", .. }
        ));
        assert_eq!(db.find_node_by_label("cat").unwrap(), None);
    }

    #[test]
    fn duplicate_label_rejected() {
        let (_dir, db) = store();
        let id = db.create_node("cat", &PropertySet::new()).unwrap();
        let err = db.create_node("cat", &PropertySet::new()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateLabel { existing_id, .. } if existing_id == id));
        assert_eq!(db.node_count().unwrap(), 1);
    }

    #[test]
    fn dangling_edge_rejected() {
        let (_dir, db) = store();
        let cat = db.create_node("cat", &PropertySet::new()).unwrap();
        let err = db
            .create_edge(cat, &RelationKind::Is, 42, &PropertySet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DanglingEdge {
                role: "target",
                node_id: 42,
                ..
            }
        ));
        assert_eq!(db.edge_count().unwrap(), 0);
    }

    #[test]
    fn edges_and_adjacency() {
        let (_dir, db) = store();
        let cat = db.create_node("cat", &PropertySet::new()).unwrap();
        let small = db.create_node("small", &PropertySet::new()).unwrap();
        let animal = db.create_node("animal", &PropertySet::new()).unwrap();
        let is = db
            .create_edge(cat, &RelationKind::Is, small, &PropertySet::new().with("occurrences", 1))
            .unwrap();
        let is_a = db
            .create_edge(cat, &RelationKind::IsA, animal, &PropertySet::new())
            .unwrap();

        let from: Vec<u64> = db.get_edges_from(cat).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(from, vec![is, is_a]);
        let to = db.get_edges_to(animal).unwrap();
        assert_eq!(to.len(), 1);
        assert_eq!(to[0].kind, RelationKind::IsA);
        assert_eq!(db.get_edge(is).unwrap().properties.int("occurrences").unwrap(), 1);
    }

    #[test]
    fn delete_node_with_edges_is_refused() {
        let (_dir, db) = store();
        let cat = db.create_node("cat", &PropertySet::new()).unwrap();
        let small = db.create_node("small", &PropertySet::new()).unwrap();
        let edge = db
            .create_edge(cat, &RelationKind::Is, small, &PropertySet::new())
            .unwrap();

        let err = db.delete_node(small).unwrap_err();
        assert!(matches!(err, StoreError::NodeInUse { edges: 1, .. }));
        assert!(db.get_node(small).is_ok());

        db.delete_edge(edge).unwrap();
        db.delete_node(small).unwrap();
        assert!(db.get_edges_from(cat).unwrap().is_empty());
    }

    #[test]
    fn put_node_renames_and_replaces_properties() {
        let (_dir, db) = store();
        db.put_node(5, "kitty", &PropertySet::new().with("a", 1)).unwrap();
        let outcome = db
            .put_node(5, "cat", &PropertySet::new().with("b", 2))
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Updated);

        let node = db.get_node(5).unwrap();
        assert_eq!(node.label, "cat");
        assert!(node.properties.get("a").is_none());
        assert_eq!(db.find_node_by_label("kitty").unwrap(), None);
        assert_eq!(db.find_node_by_label("cat").unwrap(), Some(5));

        let err = db.put_node(6, "cat", &PropertySet::new()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateLabel { existing_id: 5, .. }));
    }

    #[test]
    fn relabel_swaps_labels_atomically() {
        let (_dir, db) = store();
        let empty = PropertySet::new();
        db.put_node(1, "alpha", &empty).unwrap();
        db.put_node(2, "beta", &empty).unwrap();
        db.put_node(3, "gamma", &empty).unwrap();

        db.relabel_nodes(&[(1, "beta", &empty), (2, "alpha", &empty)])
            .unwrap();
        assert_eq!(db.find_node_by_label("alpha").unwrap(), Some(2));
        assert_eq!(db.find_node_by_label("beta").unwrap(), Some(1));
        assert_eq!(db.stored_label(1).unwrap().as_deref(), Some("beta"));

        // A label held outside the batch is refused and nothing changes.
        let err = db
            .relabel_nodes(&[(1, "delta", &empty), (2, "gamma", &empty)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateLabel { existing_id: 3, .. }));
        assert_eq!(db.find_node_by_label("beta").unwrap(), Some(1));
        assert_eq!(db.find_node_by_label("delta").unwrap(), None);
        assert_eq!(db.stored_label(9).unwrap(), None);
    }

    #[test]
    fn put_edge_moves_adjacency() {
        let (_dir, db) = store();
        for (id, label) in [(1, "a"), (2, "b"), (3, "c")] {
            db.put_node(id, label, &PropertySet::new()).unwrap();
        }
        db.put_edge(10, 1, &RelationKind::Relates, 2, &PropertySet::new())
            .unwrap();
        db.put_edge(10, 1, &RelationKind::Relates, 3, &PropertySet::new())
            .unwrap();
        assert!(db.get_edges_to(2).unwrap().is_empty());
        assert_eq!(db.get_edges_to(3).unwrap()[0].id, 10);
        // Ids keep flowing after caller-assigned ones.
        assert_eq!(db.create_node("d", &PropertySet::new()).unwrap(), 4);
    }

    #[test]
    fn bulk_load_and_clear() {
        let (_dir, db) = store();
        let cat = db.create_node("cat", &PropertySet::new().with("pos", "noun")).unwrap();
        let small = db.create_node("small", &PropertySet::new()).unwrap();
        db.create_edge(cat, &RelationKind::Is, small, &PropertySet::new())
            .unwrap();

        let nodes = db.load_all_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].properties.text("pos").unwrap(), "noun");
        assert_eq!(db.load_all_edges().unwrap().len(), 1);
        assert_eq!(db.max_ids().unwrap(), (Some(2), Some(1)));

        db.clear().unwrap();
        assert_eq!(db.node_count().unwrap(), 0);
        assert_eq!(db.edge_count().unwrap(), 0);
        assert_eq!(db.find_node_by_label("cat").unwrap(), None);
    }

    #[test]
    fn template_instantiation_clears_rows() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("template.redb");
        SchemaTemplate::write(&template).unwrap();
        {
            // A template that picked up rows by accident.
            let polluted = GraphDatabase::open(&template).unwrap();
            polluted.create_node("stray", &PropertySet::new()).unwrap();
        }

        let target = dir.path().join("kb.redb");
        let db = GraphDatabase::instantiate(&template, &target).unwrap();
        assert_eq!(db.node_count().unwrap(), 0);
        assert_eq!(db.find_node_by_label("stray").unwrap(), None);
    }

    #[test]
    fn missing_template_and_store() {
        let dir = TempDir::new().unwrap();
        let err = GraphDatabase::instantiate(&dir.path().join("none.redb"), &dir.path().join("kb.redb"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SchemaTemplate);

        let err = GraphDatabase::open(&dir.path().join("none.redb")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PersistenceFailure);
    }

    #[test]
    fn reopen_and_compact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.redb");
        {
            let db = GraphDatabase::create(&path).unwrap();
            for i in 0..20 {
                db.create_node(&format!("n{i}"), &PropertySet::new()).unwrap();
            }
            db.clear().unwrap();
        }
        let db = GraphDatabase::open(&path).unwrap();
        let (db, _compacted) = db.compact().unwrap();
        assert_eq!(db.node_count().unwrap(), 0);
        assert_eq!(db.create_node("again", &PropertySet::new()).unwrap(), 1);
    }
}
