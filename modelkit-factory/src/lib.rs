//! modelkit Factory - Optimistic Update Engine
//!
//! [`ModelFactory`] is the single entry point for reading and writing one
//! entity family. Reads are served by a read-through cache; writes run an
//! optimistic fetch-mutate-commit loop against the store and retry on version
//! conflicts with randomized backoff.
//!
//! # Example
//!
//! ```ignore
//! let accounts = ModelFactory::new(store, Arc::new(InMemoryCacheBackend::new()))
//!     .with_notifier(notifier);
//!
//! let created = accounts.opt_insert(account("ann", 0))?;
//! let id = created.key().unwrap();
//!
//! let credited = accounts.update(&id, |a| a.balance += 10)?;
//! assert_eq!(credited.before.unwrap().balance, 0);
//!
//! // Returning `false` commits nothing and reports `is_updated == false`.
//! let untouched = accounts.update(&id, |_| false)?;
//! ```

pub mod backoff;
pub mod engine;
pub mod result;
pub mod uniqueness;

pub use backoff::{Backoff, CancelToken};
pub use engine::{FactoryConfig, ModelFactory};
pub use result::{Mutation, OptResult};
pub use uniqueness::UniquenessGuard;
