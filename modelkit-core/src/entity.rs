//! The entity contract shared by stores, caches and the update engine.

use crate::key::EntityKey;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable name of an entity family.
///
/// This is the identity of the model factory that owns the entity; results
/// and change events carry it so consumers can route by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityKind(&'static str);

impl EntityKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A declared-unique column and the value an entity currently holds in it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniqueField {
    pub column: String,
    pub value: String,
}

impl UniqueField {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A persistent record with a primary key.
///
/// Entities are plain values: the engine clones one before handing it to a
/// mutator, so "before" and "after" snapshots never alias each other or the
/// cached copy.
///
/// Only `entity_kind`, `key` and `set_key` are required. Versioning,
/// created/updated timestamps and unique columns are opt-in through the
/// provided methods.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    type Key: EntityKey;

    fn entity_kind() -> EntityKind;

    /// The primary key, `None` until the store has assigned one.
    fn key(&self) -> Option<Self::Key>;

    fn set_key(&mut self, key: Self::Key);

    /// Column name used when reporting primary-key violations.
    fn key_column() -> &'static str {
        "id"
    }

    /// Optimistic-lock version. Unversioned entities are last-writer-wins.
    fn version(&self) -> Option<i64> {
        None
    }

    fn set_version(&mut self, _version: i64) {}

    /// Called once when the engine creates the entity for insertion.
    fn mark_created(&mut self, _at: Timestamp) {}

    /// Called before every committed write.
    fn mark_updated(&mut self, _at: Timestamp) {}

    fn unique_fields(&self) -> Vec<UniqueField> {
        Vec::new()
    }
}
