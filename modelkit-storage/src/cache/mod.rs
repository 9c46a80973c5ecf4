//! Read-through cache with negative caching and explicit invalidation.
//!
//! The cache owns its entries. Callers always receive clones, so a cached
//! value can never be mutated through a reference handed out by a read.
//!
//! # Slots
//!
//! A key is in one of three states:
//!
//! - no slot: never looked up (or invalidated), the next read goes to the store
//! - [`CacheSlot::Absent`]: looked up and confirmed missing
//! - [`CacheSlot::Present`]: looked up and found
//!
//! Entries are only removed by explicit invalidation; there is no TTL.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(store, Arc::new(InMemoryCacheBackend::new()));
//!
//! let account = cache.get(&id)?;          // miss: one store fetch
//! let again = cache.get(&id)?;            // hit, even if the row is missing
//! cache.invalidate(&id, ChangeKind::Update)?;
//! ```

pub mod memory_backend;
pub mod read_through;
pub mod traits;

pub use memory_backend::{InMemoryCacheBackend, ReplicatedCacheBackend};
pub use read_through::ReadThroughCache;
pub use traits::{CacheBackend, CacheSlot, CacheStats};
