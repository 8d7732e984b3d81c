//! Generic entity ↔ row mapping with an identity cache.
//!
//! Each entity kind implements [`Record`] to name its table and id; a
//! [`RecordMapper`] then provides load/save/delete over that table. Rows are
//! bincode-encoded. Loaded entities are cached as `Arc`s so repeated loads of
//! the same id return the same shared instance.

use std::sync::Arc;

use dashmap::DashMap;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, persistence};
use crate::property::{PropertySet, PropertyValue};

use super::StoreResult;

/// Schema mapping for one entity kind.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table holding rows of this kind, keyed by id.
    const TABLE: TableDefinition<'static, u64, &'static [u8]>;
    /// Entity name used in error messages.
    const ENTITY: &'static str;

    fn id(&self) -> u64;
}

/// Whether a save created a row or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
}

pub(crate) fn encode<T: Serialize>(entity: &'static str, id: u64, value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        entity,
        id,
        message: e.to_string(),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(entity: &'static str, id: u64, bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        entity,
        id,
        message: e.to_string(),
    })
}

/// Persistence for one [`Record`] kind.
pub struct RecordMapper<R: Record> {
    db: Arc<Database>,
    cache: DashMap<u64, Arc<R>>,
}

impl<R: Record> RecordMapper<R> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: DashMap::new(),
        }
    }

    fn read(&self, id: u64) -> StoreResult<Option<R>> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let table = txn
            .open_table(R::TABLE)
            .map_err(persistence(format!("open {} table", R::ENTITY)))?;
        let row = table
            .get(id)
            .map_err(persistence(format!("read {} {id}", R::ENTITY)))?;
        row.map(|guard| decode(R::ENTITY, id, guard.value()))
            .transpose()
    }

    /// Load by id, serving repeated loads from the identity cache.
    pub fn load(&self, id: u64) -> StoreResult<Arc<R>> {
        if let Some(hit) = self.cache.get(&id) {
            return Ok(Arc::clone(hit.value()));
        }
        let record = self.read(id)?.ok_or(StoreError::NotFound {
            entity: R::ENTITY,
            id,
        })?;
        let entry = self.cache.entry(id).or_insert_with(|| Arc::new(record));
        Ok(Arc::clone(entry.value()))
    }

    /// Like [`load`](Self::load) but with absence as `None`.
    pub fn find(&self, id: u64) -> StoreResult<Option<Arc<R>>> {
        match self.load(id) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self, id: u64) -> StoreResult<bool> {
        if self.cache.contains_key(&id) {
            return Ok(true);
        }
        Ok(self.read(id)?.is_some())
    }

    /// Insert or update in its own transaction; the cache holds the new
    /// value once the commit succeeds.
    pub fn save(&self, record: &R) -> StoreResult<SaveOutcome> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        let outcome = self.save_in(&txn, record)?;
        txn.commit()
            .map_err(persistence(format!("commit {} {}", R::ENTITY, record.id())))?;
        self.cache.insert(record.id(), Arc::new(record.clone()));
        Ok(outcome)
    }

    /// Write the row inside a caller-owned transaction. The cache entry is
    /// evicted; the caller commits.
    pub fn save_in(&self, txn: &WriteTransaction, record: &R) -> StoreResult<SaveOutcome> {
        let id = record.id();
        let bytes = encode(R::ENTITY, id, record)?;
        let mut table = txn
            .open_table(R::TABLE)
            .map_err(persistence(format!("open {} table", R::ENTITY)))?;
        let previous = table
            .insert(id, bytes.as_slice())
            .map_err(persistence(format!("write {} {id}", R::ENTITY)))?;
        self.cache.remove(&id);
        Ok(if previous.is_some() {
            SaveOutcome::Updated
        } else {
            SaveOutcome::Inserted
        })
    }

    /// Delete in its own transaction. Fails with `NotFound` if no row exists.
    pub fn delete(&self, id: u64) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(persistence("begin_write"))?;
        if !self.delete_in(&txn, id)? {
            txn.abort().map_err(persistence("abort"))?;
            return Err(StoreError::NotFound {
                entity: R::ENTITY,
                id,
            });
        }
        txn.commit()
            .map_err(persistence(format!("commit delete {} {id}", R::ENTITY)))?;
        Ok(())
    }

    /// Remove the row inside a caller-owned transaction. Returns whether a
    /// row existed.
    pub fn delete_in(&self, txn: &WriteTransaction, id: u64) -> StoreResult<bool> {
        let mut table = txn
            .open_table(R::TABLE)
            .map_err(persistence(format!("open {} table", R::ENTITY)))?;
        let removed = table
            .remove(id)
            .map_err(persistence(format!("delete {} {id}", R::ENTITY)))?
            .is_some();
        self.cache.remove(&id);
        Ok(removed)
    }

    /// Every row, ordered by id. Bypasses the cache.
    pub fn load_all(&self) -> StoreResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let table = txn
            .open_table(R::TABLE)
            .map_err(persistence(format!("open {} table", R::ENTITY)))?;
        let mut records = Vec::new();
        for entry in table
            .iter()
            .map_err(persistence(format!("scan {} table", R::ENTITY)))?
        {
            let (key, value) = entry.map_err(persistence(format!("scan {} table", R::ENTITY)))?;
            records.push(decode(R::ENTITY, key.value(), value.value())?);
        }
        Ok(records)
    }

    /// Largest stored id, if any.
    pub fn max_id(&self) -> StoreResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let table = txn
            .open_table(R::TABLE)
            .map_err(persistence(format!("open {} table", R::ENTITY)))?;
        let last = table
            .last()
            .map_err(persistence(format!("scan {} table", R::ENTITY)))?;
        Ok(last.map(|(key, _)| key.value()))
    }

    pub fn count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(persistence("begin_read"))?;
        let table = txn
            .open_table(R::TABLE)
            .map_err(persistence(format!("open {} table", R::ENTITY)))?;
        table
            .len()
            .map_err(persistence(format!("count {} table", R::ENTITY)))
    }

    pub fn evict(&self, id: u64) {
        self.cache.remove(&id);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl<R: Record> std::fmt::Debug for RecordMapper<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordMapper")
            .field("entity", &R::ENTITY)
            .field("cached", &self.cache.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Property rows
// ---------------------------------------------------------------------------

/// Tagged row form of a [`PropertyValue`]. The in-memory type is untagged for
/// JSON, which bincode cannot decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum StoredValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&PropertyValue> for StoredValue {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Bool(b) => StoredValue::Bool(*b),
            PropertyValue::Int(i) => StoredValue::Int(*i),
            PropertyValue::Float(x) => StoredValue::Float(*x),
            PropertyValue::Text(s) => StoredValue::Text(s.clone()),
        }
    }
}

impl From<StoredValue> for PropertyValue {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Bool(b) => PropertyValue::Bool(b),
            StoredValue::Int(i) => PropertyValue::Int(i),
            StoredValue::Float(x) => PropertyValue::Float(x),
            StoredValue::Text(s) => PropertyValue::Text(s),
        }
    }
}

pub(crate) type PropertyTable = TableDefinition<'static, (u64, &'static str), &'static [u8]>;

/// Property keys stored for `owner`.
fn property_keys<T>(table: &T, owner: u64, entity: &'static str) -> StoreResult<Vec<String>>
where
    T: ReadableTable<(u64, &'static str), &'static [u8]>,
{
    let mut keys = Vec::new();
    let start: (u64, &str) = (owner, "");
    for entry in table
        .range(start..)
        .map_err(persistence(format!("scan {entity} {owner} properties")))?
    {
        let (key, _) = entry.map_err(persistence(format!("scan {entity} {owner} properties")))?;
        let (id, name) = key.value();
        if id != owner {
            break;
        }
        keys.push(name.to_owned());
    }
    Ok(keys)
}

/// Read every property row of `owner`.
pub(crate) fn read_properties<T>(table: &T, owner: u64, entity: &'static str) -> StoreResult<PropertySet>
where
    T: ReadableTable<(u64, &'static str), &'static [u8]>,
{
    let mut properties = PropertySet::new();
    let start: (u64, &str) = (owner, "");
    for entry in table
        .range(start..)
        .map_err(persistence(format!("scan {entity} {owner} properties")))?
    {
        let (key, value) = entry.map_err(persistence(format!("scan {entity} {owner} properties")))?;
        let (id, name) = key.value();
        if id != owner {
            break;
        }
        let stored: StoredValue = decode(entity, owner, value.value())?;
        properties.set(name, PropertyValue::from(stored));
    }
    Ok(properties)
}

/// Delete every property row of `owner`.
pub(crate) fn clear_properties(
    txn: &WriteTransaction,
    table: PropertyTable,
    owner: u64,
    entity: &'static str,
) -> StoreResult<()> {
    let mut rows = txn
        .open_table(table)
        .map_err(persistence(format!("open {entity} properties")))?;
    for key in property_keys(&rows, owner, entity)? {
        rows.remove((owner, key.as_str()))
            .map_err(persistence(format!("delete {entity} {owner} property {key}")))?;
    }
    Ok(())
}

/// Replace the property rows of `owner` with `properties`.
pub(crate) fn write_properties(
    txn: &WriteTransaction,
    table: PropertyTable,
    owner: u64,
    properties: &PropertySet,
    entity: &'static str,
) -> StoreResult<()> {
    clear_properties(txn, table, owner, entity)?;
    let mut rows = txn
        .open_table(table)
        .map_err(persistence(format!("open {entity} properties")))?;
    for (key, value) in properties.iter() {
        let bytes = encode(entity, owner, &StoredValue::from(value))?;
        rows.insert((owner, key), bytes.as_slice())
            .map_err(persistence(format!("write {entity} {owner} property {key}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{NODE_PROPERTIES, SchemaTemplate};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u64,
        text: String,
    }

    impl Record for Note {
        const TABLE: TableDefinition<'static, u64, &'static [u8]> = TableDefinition::new("notes");
        const ENTITY: &'static str = "note";

        fn id(&self) -> u64 {
            self.id
        }
    }

    fn setup() -> (TempDir, Arc<Database>, RecordMapper<Note>) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::create(dir.path().join("records.redb")).unwrap());
        SchemaTemplate::initialize(&db).unwrap();
        {
            let txn = db.begin_write().unwrap();
            txn.open_table(Note::TABLE).unwrap();
            txn.commit().unwrap();
        }
        let mapper = RecordMapper::new(Arc::clone(&db));
        (dir, db, mapper)
    }

    fn note(id: u64, text: &str) -> Note {
        Note {
            id,
            text: text.into(),
        }
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, _db, mapper) = setup();
        let err = mapper.load(7).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "note", id: 7 }));
        assert!(mapper.find(7).unwrap().is_none());
        assert!(!mapper.exists(7).unwrap());
    }

    #[test]
    fn save_then_update() {
        let (_dir, _db, mapper) = setup();
        assert_eq!(mapper.save(&note(1, "a")).unwrap(), SaveOutcome::Inserted);
        assert_eq!(mapper.save(&note(1, "b")).unwrap(), SaveOutcome::Updated);
        assert_eq!(mapper.load(1).unwrap().text, "b");
        assert_eq!(mapper.count().unwrap(), 1);
    }

    #[test]
    fn repeated_loads_share_identity() {
        let (_dir, _db, mapper) = setup();
        mapper.save(&note(1, "a")).unwrap();
        mapper.clear_cache();

        let first = mapper.load(1).unwrap();
        let second = mapper.load(1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mapper.cached_len(), 1);

        mapper.evict(1);
        let third = mapper.load(1).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn delete_removes_row_and_cache() {
        let (_dir, _db, mapper) = setup();
        mapper.save(&note(1, "a")).unwrap();
        mapper.load(1).unwrap();
        mapper.delete(1).unwrap();
        assert_eq!(mapper.cached_len(), 0);
        assert!(!mapper.exists(1).unwrap());
        assert!(matches!(
            mapper.delete(1).unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn load_all_and_max_id() {
        let (_dir, _db, mapper) = setup();
        assert_eq!(mapper.max_id().unwrap(), None);
        for (id, text) in [(3, "c"), (1, "a"), (2, "b")] {
            mapper.save(&note(id, text)).unwrap();
        }
        let ids: Vec<u64> = mapper.load_all().unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(mapper.max_id().unwrap(), Some(3));
    }

    #[test]
    fn save_in_is_visible_only_after_commit() {
        let (_dir, db, mapper) = setup();
        let txn = db.begin_write().unwrap();
        mapper.save_in(&txn, &note(5, "pending")).unwrap();
        txn.abort().unwrap();
        assert!(!mapper.exists(5).unwrap());
    }

    #[test]
    fn property_rows_are_scoped_to_owner() {
        let (_dir, db, _mapper) = setup();
        let txn = db.begin_write().unwrap();
        let first = PropertySet::new().with("occurrences", 2).with("pos", "noun");
        let second = PropertySet::new().with("occurrences", 9);
        write_properties(&txn, NODE_PROPERTIES, 1, &first, "node").unwrap();
        write_properties(&txn, NODE_PROPERTIES, 2, &second, "node").unwrap();
        // Rewriting replaces rather than accumulates.
        let rewritten = PropertySet::new().with("pos", "verb");
        write_properties(&txn, NODE_PROPERTIES, 1, &rewritten, "node").unwrap();
        txn.commit().unwrap();

        let txn = db.begin_read().unwrap();
        let table = txn.open_table(NODE_PROPERTIES).unwrap();
        assert_eq!(read_properties(&table, 1, "node").unwrap(), rewritten);
        assert_eq!(read_properties(&table, 2, "node").unwrap(), second);
        assert!(read_properties(&table, 3, "node").unwrap().is_empty());
    }
}
