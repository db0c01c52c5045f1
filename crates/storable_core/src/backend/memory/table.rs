//! Row storage and unique key indexes of the in-memory backend.

use crate::error::{CoreError, CoreResult};
use crate::hash::{key_hash, record_hashes, KeyHash, RecordHashes};
use crate::key::{Filter, Key};
use crate::metadata::EntityDescriptor;
use crate::types::MetadataType;
use crate::value::Record;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A write against one table.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Create(Vec<Record>),
    Save(Record),
    Update(Key, Record),
    Patch(Key, Record),
    Delete(Key),
}

/// Records a mutation replaced or removed, and records it wrote.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub before: Vec<Record>,
    pub after: Vec<Record>,
}

/// Unique index: key hash -> row.
#[derive(Debug, Clone, Default)]
struct UniqueIndex {
    entries: HashMap<KeyHash, u64>,
}

impl UniqueIndex {
    /// Returns true if `hash` belongs to a row other than `row`.
    fn clashes(&self, hash: &str, row: Option<u64>) -> bool {
        self.entries.get(hash).is_some_and(|&r| Some(r) != row)
    }

    fn insert(&mut self, hash: &KeyHash, row: u64) {
        self.entries.insert(hash.clone(), row);
    }

    fn remove(&mut self, hash: &str, row: u64) {
        if self.entries.get(hash) == Some(&row) {
            self.entries.remove(hash);
        }
    }

    fn lookup(&self, hash: &str) -> Option<u64> {
        self.entries.get(hash).copied()
    }
}

/// All rows of one entity.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    descriptor: Arc<EntityDescriptor>,
    rows: BTreeMap<u64, Record>,
    next_row: u64,
    surrogate: UniqueIndex,
    primary: UniqueIndex,
    alternates: BTreeMap<String, UniqueIndex>,
}

impl Table {
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            descriptor,
            rows: BTreeMap::new(),
            next_row: 1,
            surrogate: UniqueIndex::default(),
            primary: UniqueIndex::default(),
            alternates: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    fn entity(&self) -> &str {
        self.descriptor.name()
    }

    fn hashes_of(&self, record: &Record) -> CoreResult<RecordHashes> {
        let hashes = record_hashes(&self.descriptor, record);
        if hashes.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "{} record has no complete key",
                self.entity()
            )));
        }
        Ok(hashes)
    }

    /// Name of the first key that collides with another row.
    fn conflict(&self, hashes: &RecordHashes, row: Option<u64>) -> Option<String> {
        if hashes
            .surrogate
            .as_deref()
            .is_some_and(|h| self.surrogate.clashes(h, row))
        {
            return Some("surrogate key".to_string());
        }
        if hashes
            .primary
            .as_deref()
            .is_some_and(|h| self.primary.clashes(h, row))
        {
            return Some("primary key".to_string());
        }
        hashes
            .alternates
            .iter()
            .find(|(name, h)| {
                self.alternates
                    .get(*name)
                    .is_some_and(|index| index.clashes(h, row))
            })
            .map(|(name, _)| format!("alternate key {name}"))
    }

    fn index(&mut self, hashes: &RecordHashes, row: u64) {
        if let Some(h) = &hashes.surrogate {
            self.surrogate.insert(h, row);
        }
        if let Some(h) = &hashes.primary {
            self.primary.insert(h, row);
        }
        for (name, h) in &hashes.alternates {
            self.alternates.entry(name.clone()).or_default().insert(h, row);
        }
    }

    fn unindex(&mut self, hashes: &RecordHashes, row: u64) {
        if let Some(h) = &hashes.surrogate {
            self.surrogate.remove(h, row);
        }
        if let Some(h) = &hashes.primary {
            self.primary.remove(h, row);
        }
        for (name, h) in &hashes.alternates {
            if let Some(index) = self.alternates.get_mut(name) {
                index.remove(h, row);
            }
        }
    }

    /// Finds the row a key addresses.
    pub fn locate(&self, key: &Key) -> CoreResult<Option<u64>> {
        let hash = key_hash(&self.descriptor, key)?;
        Ok(match key {
            Key::Surrogate(_) => self.surrogate.lookup(&hash),
            Key::Primary(_) => self.primary.lookup(&hash),
            Key::Alternate { name, .. } => self.alternates.get(name).and_then(|i| i.lookup(&hash)),
        })
    }

    pub fn get(&self, key: &Key) -> CoreResult<Option<&Record>> {
        Ok(self.locate(key)?.and_then(|row| self.rows.get(&row)))
    }

    pub fn scan<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Record> + 'a {
        self.rows.values().filter(move |record| filter.matches(record))
    }

    fn insert(&mut self, record: Record, hashes: &RecordHashes) -> u64 {
        let row = self.next_row;
        self.next_row += 1;
        self.index(hashes, row);
        self.rows.insert(row, record);
        row
    }

    /// Replaces a row. The surrogate key of a stored row never changes and
    /// creation stamps survive a replacement that does not carry them.
    fn replace(&mut self, row: u64, mut record: Record) -> CoreResult<Applied> {
        let old = self
            .rows
            .get(&row)
            .cloned()
            .ok_or_else(|| CoreError::illegal_state(format!("row {row} vanished")))?;
        if let Some(surrogate) = self.descriptor.surrogate_key() {
            record.insert(surrogate.name(), old.value(surrogate.name()));
        }
        for element in self.descriptor.elements_with(MetadataType::CreatedDate) {
            if record.is_null(element.name()) {
                record.insert(element.name(), old.value(element.name()));
            }
        }

        let new_hashes = self.hashes_of(&record)?;
        if let Some(key) = self.conflict(&new_hashes, Some(row)) {
            return Err(CoreError::key_violation(self.entity(), key));
        }
        let old_hashes = record_hashes(&self.descriptor, &old);
        self.unindex(&old_hashes, row);
        self.index(&new_hashes, row);
        self.rows.insert(row, record.clone());
        Ok(Applied {
            before: vec![old],
            after: vec![record],
        })
    }

    fn remove(&mut self, row: u64) -> Option<Record> {
        let record = self.rows.remove(&row)?;
        let hashes = record_hashes(&self.descriptor, &record);
        self.unindex(&hashes, row);
        Some(record)
    }

    fn require(&self, key: &Key) -> CoreResult<u64> {
        self.locate(key)?
            .ok_or_else(|| CoreError::not_found(self.entity(), key.to_string()))
    }

    /// Applies a mutation; nothing changes if it fails.
    pub fn apply(&mut self, mutation: &Mutation) -> CoreResult<Applied> {
        match mutation {
            Mutation::Create(records) => {
                // Validate the whole batch before writing any of it.
                let mut seen = HashSet::new();
                let mut batch = Vec::with_capacity(records.len());
                for record in records {
                    let hashes = self.hashes_of(record)?;
                    if let Some(key) = self.conflict(&hashes, None) {
                        return Err(CoreError::key_violation(self.entity(), key));
                    }
                    let tagged = hashes
                        .surrogate
                        .iter()
                        .map(|h| ("#surrogate", h))
                        .chain(hashes.primary.iter().map(|h| ("#primary", h)))
                        .chain(hashes.alternates.iter().map(|(n, h)| (n.as_str(), h)));
                    for (kind, hash) in tagged {
                        if !seen.insert((kind.to_string(), hash.clone())) {
                            return Err(CoreError::key_violation(
                                self.entity(),
                                "key within batch",
                            ));
                        }
                    }
                    batch.push((record.clone(), hashes));
                }
                let after = batch
                    .into_iter()
                    .map(|(record, hashes)| {
                        self.insert(record.clone(), &hashes);
                        record
                    })
                    .collect();
                Ok(Applied {
                    before: Vec::new(),
                    after,
                })
            }
            Mutation::Save(record) => {
                let hashes = self.hashes_of(record)?;
                let existing = hashes
                    .primary
                    .as_deref()
                    .and_then(|h| self.primary.lookup(h))
                    .or_else(|| {
                        hashes
                            .surrogate
                            .as_deref()
                            .and_then(|h| self.surrogate.lookup(h))
                    });
                match existing {
                    Some(row) => self.replace(row, record.clone()),
                    None => {
                        if let Some(key) = self.conflict(&hashes, None) {
                            return Err(CoreError::key_violation(self.entity(), key));
                        }
                        self.insert(record.clone(), &hashes);
                        Ok(Applied {
                            before: Vec::new(),
                            after: vec![record.clone()],
                        })
                    }
                }
            }
            Mutation::Update(key, record) => {
                let row = self.require(key)?;
                self.replace(row, record.clone())
            }
            Mutation::Patch(key, changes) => {
                let row = self.require(key)?;
                let mut merged = self.rows.get(&row).cloned().unwrap_or_default();
                merged.merge(changes);
                self.replace(row, merged)
            }
            Mutation::Delete(key) => Ok(Applied {
                before: self
                    .locate(key)?
                    .and_then(|row| self.remove(row))
                    .into_iter()
                    .collect(),
                after: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DescriptorCache;
    use crate::test_entities::Item;
    use crate::value::{from_epoch_millis, Value};

    fn table() -> Table {
        Table::new(DescriptorCache::new().describe::<Item>().unwrap())
    }

    fn item(id: &str, sku: &str, code: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("sku", sku)
            .with("code", code)
            .with("qty", 1_i64)
    }

    #[test]
    fn create_and_lookup_by_every_key() {
        let mut t = table();
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1")])).unwrap();
        assert!(t.get(&Key::id("i1")).unwrap().is_some());
        assert!(t.get(&Key::primary(["s1"])).unwrap().is_some());
        assert!(t.get(&Key::alternate("by_code", ["c1"])).unwrap().is_some());
        assert!(t.get(&Key::primary(["s2"])).unwrap().is_none());
    }

    #[test]
    fn duplicate_primary_key_is_a_violation() {
        let mut t = table();
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1")])).unwrap();
        let err = t
            .apply(&Mutation::Create(vec![item("i2", "s1", "c2")]))
            .unwrap_err();
        assert_eq!(err, CoreError::key_violation("Item", "primary key"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut t = table();
        let err = t
            .apply(&Mutation::Create(vec![
                item("i1", "s1", "c1"),
                item("i2", "s2", "c1"),
            ]))
            .unwrap_err();
        assert!(matches!(err, CoreError::KeyViolation { .. }));
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn record_without_any_key_is_rejected() {
        let mut t = table();
        let err = t
            .apply(&Mutation::Create(vec![Record::new().with("qty", 1_i64)]))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn update_missing_is_not_found() {
        let mut t = table();
        let err = t
            .apply(&Mutation::Update(Key::primary(["nope"]), item("i1", "nope", "c1")))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn replace_keeps_surrogate_and_creation_stamp() {
        let mut t = table();
        let created = Value::Timestamp(from_epoch_millis(1_000));
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1").with("created", created.clone())]))
            .unwrap();
        let applied = t
            .apply(&Mutation::Save(item("other", "s1", "c9")))
            .unwrap();
        let stored = &applied.after[0];
        assert_eq!(stored.value("id"), Value::from("i1"));
        assert_eq!(stored.value("created"), created);
        assert!(t.get(&Key::alternate("by_code", ["c9"])).unwrap().is_some());
        assert!(t.get(&Key::alternate("by_code", ["c1"])).unwrap().is_none());
        assert!(t.get(&Key::id("other")).unwrap().is_none());
    }

    #[test]
    fn patch_merges_changes() {
        let mut t = table();
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1")])).unwrap();
        t.apply(&Mutation::Patch(
            Key::id("i1"),
            Record::new().with("qty", 5_i64),
        ))
        .unwrap();
        let row = t.get(&Key::id("i1")).unwrap().unwrap();
        assert_eq!(row.value("qty"), Value::Long(5));
        assert_eq!(row.value("sku"), Value::from("s1"));
    }

    #[test]
    fn update_into_a_taken_key_fails_and_keeps_indexes() {
        let mut t = table();
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1"), item("i2", "s2", "c2")]))
            .unwrap();
        let err = t
            .apply(&Mutation::Update(Key::id("i2"), item("i2", "s2", "c1")))
            .unwrap_err();
        assert!(matches!(err, CoreError::KeyViolation { .. }));
        assert!(t.get(&Key::alternate("by_code", ["c2"])).unwrap().is_some());
    }

    #[test]
    fn delete_returns_removed_row() {
        let mut t = table();
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1")])).unwrap();
        let applied = t.apply(&Mutation::Delete(Key::primary(["s1"]))).unwrap();
        assert_eq!(applied.before.len(), 1);
        assert!(t.get(&Key::id("i1")).unwrap().is_none());
        let applied = t.apply(&Mutation::Delete(Key::primary(["s1"]))).unwrap();
        assert!(applied.before.is_empty());
    }

    #[test]
    fn scan_applies_filters() {
        let mut t = table();
        t.apply(&Mutation::Create(vec![item("i1", "s1", "c1"), item("i2", "s2", "c2")]))
            .unwrap();
        let example = Filter::Example(Record::new().with("sku", "s2"));
        assert_eq!(t.scan(&example).count(), 1);
        assert_eq!(t.scan(&Filter::All).count(), 2);
    }
}
