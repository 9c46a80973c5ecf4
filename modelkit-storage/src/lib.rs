//! modelkit Storage - Entity Store Trait, Mock Store and Cache
//!
//! Defines the storage abstraction consumed by the update engine and the
//! read-through cache that fronts it. Real backends (SQL, wide-column) live
//! outside this workspace and only need to implement [`EntityStore`].

pub mod cache;
pub mod constraint;
pub mod memory;

pub use cache::{
    CacheBackend, CacheSlot, CacheStats, InMemoryCacheBackend, ReadThroughCache,
    ReplicatedCacheBackend,
};
pub use constraint::ConstraintTranslator;
pub use memory::{ExternalTransaction, InMemoryStore, StoreStats};

use modelkit_core::{Entity, StoreResult};
use std::collections::{BTreeSet, HashMap};

/// Outcome of a version-checked write.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<E> {
    /// The entity as committed (version bumped when `changed`).
    pub entity: E,
    /// `false` when the row already held exactly this state and nothing was
    /// written.
    pub changed: bool,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage backend for one entity family.
///
/// "Not found" is never an error: single reads return `None` and bulk reads
/// omit the key. Writes report version conflicts as
/// [`StoreError::ConcurrentModification`](modelkit_core::StoreError) and
/// uniqueness failures as
/// [`StoreError::UniqueConstraintViolation`](modelkit_core::StoreError); the
/// update engine's retry decision depends on the two staying distinct.
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Fetch one entity by key.
    fn fetch_by_id(&self, key: &E::Key) -> StoreResult<Option<E>>;

    /// Fetch many entities in one round trip. Absent keys are omitted.
    fn fetch_by_ids(&self, keys: &BTreeSet<E::Key>) -> StoreResult<HashMap<E::Key, E>>;

    /// Insert a new entity, assigning a key when none is set.
    fn persist_new(&self, entity: E) -> StoreResult<E>;

    /// Version-checked update of an existing entity.
    fn merge_existing(&self, entity: E) -> StoreResult<Merged<E>>;

    /// Version-checked delete.
    fn delete(&self, entity: &E) -> StoreResult<()>;

    /// Strongly consistent lookup of the row holding `value` in a
    /// declared-unique column.
    fn find_by_unique(&self, column: &str, value: &str) -> StoreResult<Option<E::Key>>;

    /// Whether the caller is inside an externally managed transaction.
    fn in_transaction(&self) -> bool {
        false
    }
}

impl<E: Entity, S: EntityStore<E> + ?Sized> EntityStore<E> for std::sync::Arc<S> {
    fn fetch_by_id(&self, key: &E::Key) -> StoreResult<Option<E>> {
        (**self).fetch_by_id(key)
    }

    fn fetch_by_ids(&self, keys: &BTreeSet<E::Key>) -> StoreResult<HashMap<E::Key, E>> {
        (**self).fetch_by_ids(keys)
    }

    fn persist_new(&self, entity: E) -> StoreResult<E> {
        (**self).persist_new(entity)
    }

    fn merge_existing(&self, entity: E) -> StoreResult<Merged<E>> {
        (**self).merge_existing(entity)
    }

    fn delete(&self, entity: &E) -> StoreResult<()> {
        (**self).delete(entity)
    }

    fn find_by_unique(&self, column: &str, value: &str) -> StoreResult<Option<E::Key>> {
        (**self).find_by_unique(column, value)
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}
