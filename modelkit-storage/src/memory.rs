//! In-memory entity store for testing and single-process use.

use crate::constraint::ConstraintTranslator;
use crate::{EntityStore, Merged};
use modelkit_core::{Entity, EntityKey, StoreError, StoreResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Per-operation call counts recorded by [`InMemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats<K> {
    pub fetch_by_id: u64,
    pub fetch_by_ids: u64,
    pub persist_new: u64,
    pub merge_existing: u64,
    pub delete: u64,
    pub find_by_unique: u64,
    /// Key sets passed to `fetch_by_ids`, in call order.
    pub batches: Vec<Vec<K>>,
}

impl<K> Default for StoreStats<K> {
    fn default() -> Self {
        Self {
            fetch_by_id: 0,
            fetch_by_ids: 0,
            persist_new: 0,
            merge_existing: 0,
            delete: 0,
            find_by_unique: 0,
            batches: Vec::new(),
        }
    }
}

impl<K> StoreStats<K> {
    /// Total number of read round trips.
    pub fn reads(&self) -> u64 {
        self.fetch_by_id + self.fetch_by_ids
    }

    /// Total number of write round trips.
    pub fn writes(&self) -> u64 {
        self.persist_new + self.merge_existing + self.delete
    }
}

/// Thread-safe versioned row store.
///
/// Versioned entities start at version 1 and are bumped on every changed
/// merge; a merge or delete carrying a different version than the stored row
/// fails with `ConcurrentModification`. Declared-unique columns are enforced
/// on every write and reported through [`ConstraintTranslator`], the same way
/// a relational backend reports them.
#[derive(Debug)]
pub struct InMemoryStore<E: Entity> {
    rows: RwLock<BTreeMap<E::Key, E>>,
    sequence: AtomicU64,
    external_transactions: AtomicUsize,
    stats: Mutex<StoreStats<E::Key>>,
    constraints: ConstraintTranslator,
}

impl<E: Entity> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
            external_transactions: AtomicUsize::new(0),
            stats: Mutex::new(StoreStats::default()),
            constraints: ConstraintTranslator::for_entity::<E>(),
        }
    }
}

impl<E: Entity> InMemoryStore<E> {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing statistics.
    pub fn seed(&self, entities: impl IntoIterator<Item = E>) -> StoreResult<Vec<E>> {
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut seeded = Vec::new();
        for entity in entities {
            seeded.push(self.insert_row(&mut rows, entity)?);
        }
        Ok(seeded)
    }

    /// Current row for `key`, bypassing statistics.
    pub fn row(&self, key: &E::Key) -> Option<E> {
        self.rows.read().ok().and_then(|rows| rows.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all stored rows.
    pub fn clear(&self) {
        if let Ok(mut rows) = self.rows.write() {
            rows.clear();
        }
    }

    /// Snapshot of the call statistics.
    pub fn stats(&self) -> StoreStats<E::Key> {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = StoreStats::default();
        }
    }

    /// Mark the calling context as inside an externally managed transaction
    /// until the returned guard is dropped.
    pub fn begin_external(&self) -> ExternalTransaction<'_> {
        self.external_transactions.fetch_add(1, Ordering::SeqCst);
        ExternalTransaction {
            counter: &self.external_transactions,
        }
    }

    fn record(&self, update: impl FnOnce(&mut StoreStats<E::Key>)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    fn next_key(&self, rows: &BTreeMap<E::Key, E>) -> StoreResult<E::Key> {
        loop {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let key = E::Key::from_sequence(sequence).ok_or_else(|| StoreError::Backend {
                reason: format!("{} keys cannot be generated by the store", E::entity_kind()),
            })?;
            if !rows.contains_key(&key) {
                return Ok(key);
            }
        }
    }

    fn insert_row(&self, rows: &mut BTreeMap<E::Key, E>, mut entity: E) -> StoreResult<E> {
        let key = match entity.key() {
            Some(key) => key,
            None => {
                let key = self.next_key(rows)?;
                entity.set_key(key.clone());
                key
            }
        };

        if rows.contains_key(&key) {
            return Err(self
                .constraints
                .translate(&self.constraints.primary_key_constraint(), &[]));
        }
        self.check_unique(rows, &key, &entity)?;

        if entity.version().is_some() {
            entity.set_version(1);
        }
        rows.insert(key, entity.clone());
        Ok(entity)
    }

    fn check_unique(
        &self,
        rows: &BTreeMap<E::Key, E>,
        key: &E::Key,
        entity: &E,
    ) -> StoreResult<()> {
        let fields = entity.unique_fields();
        if fields.is_empty() {
            return Ok(());
        }
        let columns: Vec<String> = fields.iter().map(|f| f.column.clone()).collect();

        for (other_key, other) in rows.iter() {
            if other_key == key {
                continue;
            }
            let taken = other.unique_fields();
            if let Some(field) = fields.iter().find(|f| taken.contains(f)) {
                return Err(self
                    .constraints
                    .translate(&self.constraints.unique_constraint(&field.column), &columns));
            }
        }
        Ok(())
    }

    fn conflict(&self, key: &E::Key) -> StoreError {
        StoreError::ConcurrentModification {
            kind: E::entity_kind(),
            key: key.to_string(),
        }
    }

    fn require_key(entity: &E, operation: &str) -> StoreResult<E::Key> {
        entity.key().ok_or_else(|| StoreError::Backend {
            reason: format!("{} requires a keyed {}", operation, E::entity_kind()),
        })
    }
}

impl<E: Entity> EntityStore<E> for InMemoryStore<E> {
    fn fetch_by_id(&self, key: &E::Key) -> StoreResult<Option<E>> {
        self.record(|s| s.fetch_by_id += 1);
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.get(key).cloned())
    }

    fn fetch_by_ids(&self, keys: &BTreeSet<E::Key>) -> StoreResult<HashMap<E::Key, E>> {
        self.record(|s| {
            s.fetch_by_ids += 1;
            s.batches.push(keys.iter().cloned().collect());
        });
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(keys
            .iter()
            .filter_map(|key| rows.get(key).map(|e| (key.clone(), e.clone())))
            .collect())
    }

    fn persist_new(&self, entity: E) -> StoreResult<E> {
        self.record(|s| s.persist_new += 1);
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        self.insert_row(&mut rows, entity)
    }

    fn merge_existing(&self, mut entity: E) -> StoreResult<Merged<E>> {
        self.record(|s| s.merge_existing += 1);
        let key = Self::require_key(&entity, "merge_existing")?;
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;

        // A row deleted underneath the writer is a conflict, not a miss: the
        // retry will observe the absence and decide.
        let current = rows.get(&key).ok_or_else(|| self.conflict(&key))?;
        if *current == entity {
            return Ok(Merged {
                entity,
                changed: false,
            });
        }
        if current.version() != entity.version() {
            return Err(self.conflict(&key));
        }
        self.check_unique(&rows, &key, &entity)?;

        if let Some(version) = current.version() {
            entity.set_version(version + 1);
        }
        rows.insert(key, entity.clone());
        Ok(Merged {
            entity,
            changed: true,
        })
    }

    fn delete(&self, entity: &E) -> StoreResult<()> {
        self.record(|s| s.delete += 1);
        let key = Self::require_key(entity, "delete")?;
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;

        let current = rows.get(&key).ok_or_else(|| self.conflict(&key))?;
        if current.version() != entity.version() {
            return Err(self.conflict(&key));
        }
        rows.remove(&key);
        Ok(())
    }

    fn find_by_unique(&self, column: &str, value: &str) -> StoreResult<Option<E::Key>> {
        self.record(|s| s.find_by_unique += 1);
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows
            .iter()
            .find(|(_, e)| {
                e.unique_fields()
                    .iter()
                    .any(|f| f.column == column && f.value == value)
            })
            .map(|(k, _)| k.clone()))
    }

    fn in_transaction(&self) -> bool {
        self.external_transactions.load(Ordering::SeqCst) > 0
    }
}

/// Guard returned by [`InMemoryStore::begin_external`].
#[derive(Debug)]
pub struct ExternalTransaction<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for ExternalTransaction<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use modelkit_core::EntityKind;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        id: Option<u64>,
        version: i64,
        value: i64,
    }

    impl Entity for Counter {
        type Key = u64;

        fn entity_kind() -> EntityKind {
            EntityKind::new("counter")
        }

        fn key(&self) -> Option<u64> {
            self.id
        }

        fn set_key(&mut self, key: u64) {
            self.id = Some(key);
        }

        fn version(&self) -> Option<i64> {
            Some(self.version)
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every changed merge bumps the version by exactly one.
        #[test]
        fn prop_version_tracks_changed_merges(
            values in prop::collection::vec(any::<i64>(), 1..20)
        ) {
            let store = InMemoryStore::new();
            let mut current = store
                .persist_new(Counter { id: None, version: 0, value: 0 })
                .unwrap();
            let mut changes = 0;

            for value in values {
                let mut next = current.clone();
                next.value = value;
                let merged = store.merge_existing(next).unwrap();
                if merged.changed {
                    changes += 1;
                }
                current = merged.entity;
            }

            prop_assert_eq!(current.version, 1 + changes);
            prop_assert_eq!(store.row(&current.id.unwrap()).unwrap(), current);
        }

        /// Bulk fetch returns exactly the stored subset of the requested keys.
        #[test]
        fn prop_fetch_by_ids_subset(
            stored in 1usize..10,
            extra in prop::collection::btree_set(100u64..200, 0..5)
        ) {
            let store = InMemoryStore::new();
            for _ in 0..stored {
                store.persist_new(Counter { id: None, version: 0, value: 0 }).unwrap();
            }
            let mut keys: BTreeSet<u64> = (1..=stored as u64).collect();
            keys.extend(extra.iter().copied());

            let found = store.fetch_by_ids(&keys).unwrap();
            prop_assert_eq!(found.len(), stored);
            prop_assert!(extra.iter().all(|k| !found.contains_key(k)));
        }
    }
}
