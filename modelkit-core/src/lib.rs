//! modelkit Core - Entity Contract and Shared Types
//!
//! Pure types shared by every other crate: the [`Entity`] trait and its keys,
//! the error taxonomy, configuration, the monotonic clock and the named-lock
//! contract. This crate holds no storage or caching logic.

pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod lock;
pub mod time;

pub use config::{
    ModelConfig, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_LOAD_ITERATIONS,
};
pub use entity::{Entity, EntityKind, UniqueField};
pub use error::{
    ConfigError, LoadError, LockError, ModelError, ModelResult, StoreError, StoreResult,
    UpdateError,
};
pub use key::{EntityKey, RelationKey};
pub use lock::{InProcessLockProvider, LockGuard, LockProvider, LockRelease};
pub use time::{micros_to_timestamp, MicroClock};

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone, microsecond resolution.
pub type Timestamp = DateTime<Utc>;

/// Why a cache entry is being dropped, and which kind of change event follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
