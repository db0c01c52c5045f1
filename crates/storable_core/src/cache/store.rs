//! Shared cache pools.

use crate::hash::KeyHash;
use crate::value::Record;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a cache lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    /// One pool per manager; never shared between managers.
    Local,
    /// One pool per registry, shared by every manager it creates.
    #[default]
    Shared,
}

/// Which entry leaves a full region first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eviction {
    /// Least recently used.
    #[default]
    Lru,
    /// Oldest insertion.
    Fifo,
    /// Never evict; inserts into a full region are dropped.
    None,
}

/// Configuration of one cache pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheDefinition {
    /// Identifier referenced by attachment rules.
    pub id: String,
    /// Local or shared.
    pub level: CacheLevel,
    /// Eviction policy of a full region.
    pub eviction: Eviction,
    /// Per-region capacity, unbounded if absent.
    pub max_entries: Option<usize>,
    /// Entry time-to-live in milliseconds, unbounded if absent.
    pub ttl_ms: Option<u64>,
}

impl Default for CacheDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            level: CacheLevel::default(),
            eviction: Eviction::default(),
            max_entries: None,
            ttl_ms: None,
        }
    }
}

impl CacheDefinition {
    /// Creates an unbounded shared LRU definition.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets the level.
    #[must_use]
    pub fn level(mut self, level: CacheLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the eviction policy.
    #[must_use]
    pub fn eviction(mut self, eviction: Eviction) -> Self {
        self.eviction = eviction;
        self
    }

    /// Sets the per-region capacity.
    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Sets the entry time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Entry time-to-live.
    #[must_use]
    pub fn ttl_duration(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Counters of one cache pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Entries stored.
    pub insertions: u64,
    /// Entries dropped for capacity or expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, `0.0` before any lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// A cache pool partitioned into regions, one per entity.
///
/// Each entry (a "slot") holds one record and is addressed by any number
/// of key hashes. Implementations are internally synchronized and return
/// independent copies from every read.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Identifier of the pool.
    fn id(&self) -> &str;

    /// Looks up a record by any of its hashes.
    fn get(&self, region: &str, hash: &str) -> Option<Record>;

    /// Returns true if a live entry is addressed by `hash`.
    fn contains(&self, region: &str, hash: &str) -> bool;

    /// Stores a record under every given hash.
    ///
    /// Entries previously addressed by any of the hashes are replaced.
    fn put(&self, region: &str, hashes: &[KeyHash], record: Record);

    /// Removes the entry addressed by `hash`, along with all its hashes.
    fn remove(&self, region: &str, hash: &str) -> Option<Record>;

    /// Number of distinct live entries in a region.
    fn count(&self, region: &str) -> usize;

    /// Drops every entry of a region.
    fn clear_region(&self, region: &str);

    /// Drops every entry.
    fn clear(&self);

    /// Current counters.
    fn stats(&self) -> CacheStats;
}

#[derive(Debug)]
struct Slot {
    record: Record,
    hashes: Vec<KeyHash>,
    inserted: Instant,
    seq: u64,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Region {
    slots: HashMap<u64, Slot>,
    index: HashMap<KeyHash, u64>,
    clock: u64,
}

impl Region {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn drop_slot(&mut self, slot_id: u64) -> Option<Slot> {
        let slot = self.slots.remove(&slot_id)?;
        for hash in &slot.hashes {
            if self.index.get(hash) == Some(&slot_id) {
                self.index.remove(hash);
            }
        }
        Some(slot)
    }

    fn victim(&self, eviction: Eviction) -> Option<u64> {
        let victim = match eviction {
            Eviction::Lru => self.slots.iter().min_by_key(|(_, s)| s.last_used),
            Eviction::Fifo => self.slots.iter().min_by_key(|(_, s)| s.seq),
            Eviction::None => None,
        };
        victim.map(|(id, _)| *id)
    }
}

/// In-process [`CacheStore`].
///
/// Regions are created on first use and each is guarded by its own lock,
/// so traffic on one entity never blocks another.
#[derive(Debug)]
pub struct MemoryCacheStore {
    definition: CacheDefinition,
    regions: RwLock<HashMap<String, Arc<Mutex<Region>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCacheStore {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(definition: CacheDefinition) -> Self {
        Self {
            definition,
            regions: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The definition the pool was built from.
    #[must_use]
    pub fn definition(&self) -> &CacheDefinition {
        &self.definition
    }

    fn region(&self, name: &str) -> Option<Arc<Mutex<Region>>> {
        self.regions.read().get(name).cloned()
    }

    fn region_or_create(&self, name: &str) -> Arc<Mutex<Region>> {
        if let Some(region) = self.region(name) {
            return region;
        }
        Arc::clone(
            self.regions
                .write()
                .entry(name.to_string())
                .or_default(),
        )
    }

    fn is_expired(&self, slot: &Slot) -> bool {
        self.definition
            .ttl_duration()
            .is_some_and(|ttl| slot.inserted.elapsed() >= ttl)
    }

    /// Finds the live slot addressed by `hash`, dropping it if expired.
    fn live_slot(&self, region: &mut Region, hash: &str) -> Option<u64> {
        let slot_id = *region.index.get(hash)?;
        let expired = region
            .slots
            .get(&slot_id)
            .map_or(true, |slot| self.is_expired(slot));
        if expired {
            if region.drop_slot(slot_id).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            region.index.remove(hash);
            return None;
        }
        Some(slot_id)
    }
}

impl CacheStore for MemoryCacheStore {
    fn id(&self) -> &str {
        &self.definition.id
    }

    fn get(&self, region: &str, hash: &str) -> Option<Record> {
        let found = self.region(region).and_then(|region| {
            let mut region = region.lock();
            let slot_id = self.live_slot(&mut region, hash)?;
            let now = region.tick();
            let slot = region.slots.get_mut(&slot_id)?;
            slot.last_used = now;
            Some(slot.record.clone())
        });
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn contains(&self, region: &str, hash: &str) -> bool {
        self.region(region).is_some_and(|region| {
            let mut region = region.lock();
            self.live_slot(&mut region, hash).is_some()
        })
    }

    fn put(&self, region: &str, hashes: &[KeyHash], record: Record) {
        if hashes.is_empty() {
            return;
        }
        let region = self.region_or_create(region);
        let mut region = region.lock();

        // Replace whatever the hashes currently address.
        let stale: Vec<u64> = hashes
            .iter()
            .filter_map(|hash| region.index.get(hash).copied())
            .collect();
        for slot_id in stale {
            region.drop_slot(slot_id);
        }

        if let Some(max) = self.definition.max_entries {
            while region.slots.len() >= max {
                let Some(victim) = region.victim(self.definition.eviction) else {
                    // Full and not allowed to evict.
                    return;
                };
                region.drop_slot(victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let slot_id = region.tick();
        for hash in hashes {
            region.index.insert(hash.clone(), slot_id);
        }
        region.slots.insert(
            slot_id,
            Slot {
                record,
                hashes: hashes.to_vec(),
                inserted: Instant::now(),
                seq: slot_id,
                last_used: slot_id,
            },
        );
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    fn remove(&self, region: &str, hash: &str) -> Option<Record> {
        let region = self.region(region)?;
        let mut region = region.lock();
        let slot_id = self.live_slot(&mut region, hash)?;
        region.drop_slot(slot_id).map(|slot| slot.record)
    }

    fn count(&self, region: &str) -> usize {
        self.region(region).map_or(0, |region| {
            let region = region.lock();
            region
                .slots
                .values()
                .filter(|slot| !self.is_expired(slot))
                .count()
        })
    }

    fn clear_region(&self, region: &str) {
        self.regions.write().remove(region);
    }

    fn clear(&self) {
        self.regions.write().clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn hashes(names: &[&str]) -> Vec<KeyHash> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn every_hash_addresses_one_slot() {
        let store = MemoryCacheStore::new(CacheDefinition::new("c"));
        store.put("User", &hashes(&["a", "b"]), Record::new().with("n", 1_i64));
        assert_eq!(store.get("User", "a"), store.get("User", "b"));
        assert_eq!(store.count("User"), 1);

        store.remove("User", "a");
        assert!(!store.contains("User", "b"));
        assert_eq!(store.count("User"), 0);
    }

    #[test]
    fn regions_are_isolated() {
        let store = MemoryCacheStore::new(CacheDefinition::new("c"));
        store.put("User", &hashes(&["a"]), Record::new());
        assert!(store.get("Account", "a").is_none());
        store.clear_region("Account");
        assert!(store.contains("User", "a"));
    }

    #[test]
    fn put_replaces_overlapping_entries() {
        let store = MemoryCacheStore::new(CacheDefinition::new("c"));
        store.put("User", &hashes(&["id1", "pk1"]), Record::new().with("v", 1_i64));
        store.put("User", &hashes(&["id1", "pk2"]), Record::new().with("v", 2_i64));
        assert_eq!(store.count("User"), 1);
        assert!(!store.contains("User", "pk1"));
        assert_eq!(store.get("User", "id1").unwrap().value("v"), Value::Long(2));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let store = MemoryCacheStore::new(CacheDefinition::new("c").max_entries(2));
        store.put("R", &hashes(&["a"]), Record::new());
        store.put("R", &hashes(&["b"]), Record::new());
        store.get("R", "a");
        store.put("R", &hashes(&["c"]), Record::new());
        assert!(store.contains("R", "a"));
        assert!(!store.contains("R", "b"));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn fifo_evicts_oldest() {
        let store = MemoryCacheStore::new(
            CacheDefinition::new("c")
                .max_entries(2)
                .eviction(Eviction::Fifo),
        );
        store.put("R", &hashes(&["a"]), Record::new());
        store.put("R", &hashes(&["b"]), Record::new());
        store.get("R", "a");
        store.put("R", &hashes(&["c"]), Record::new());
        assert!(!store.contains("R", "a"));
        assert!(store.contains("R", "b"));
    }

    #[test]
    fn no_eviction_drops_new_entries() {
        let store = MemoryCacheStore::new(
            CacheDefinition::new("c")
                .max_entries(1)
                .eviction(Eviction::None),
        );
        store.put("R", &hashes(&["a"]), Record::new());
        store.put("R", &hashes(&["b"]), Record::new());
        assert!(store.contains("R", "a"));
        assert!(!store.contains("R", "b"));
    }

    #[test]
    fn expired_entries_are_misses() {
        let store = MemoryCacheStore::new(CacheDefinition::new("c").ttl(Duration::ZERO));
        store.put("R", &hashes(&["a"]), Record::new());
        assert!(store.get("R", "a").is_none());
        assert_eq!(store.count("R"), 0);
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
    }

    #[test]
    fn reads_return_copies() {
        let store = MemoryCacheStore::new(CacheDefinition::new("c"));
        store.put("R", &hashes(&["a"]), Record::new().with("v", 1_i64));
        let mut first = store.get("R", "a").unwrap();
        first.insert("v", 99_i64);
        assert_eq!(store.get("R", "a").unwrap().value("v"), Value::Long(1));
        assert!((store.stats().hit_ratio() - 1.0).abs() < f64::EPSILON);
    }
}
