//! Named locks for serializing uniqueness checks across writers.
//!
//! A [`LockProvider`] acquires a set of names as one unit and hands back a
//! [`LockGuard`]. The guard is the only way to release: it releases on drop,
//! or explicitly through [`LockGuard::release`], which consumes it.
//!
//! ```text
//! (unlocked) ─── lock(names) ──→ LockGuard ─── release()/drop ──→ (unlocked)
//! ```
//!
//! Clustered deployments plug in a provider backed by their coordination
//! service; [`InProcessLockProvider`] covers a single process.

use crate::LockError;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Blocking acquisition of a set of named locks.
pub trait LockProvider: Send + Sync {
    /// Acquire every name in `names`, blocking until all are free.
    ///
    /// Duplicate names are collapsed. Callers should still pass names in a
    /// stable order so providers that lock one name at a time cannot
    /// deadlock against each other.
    fn lock(&self, names: &[String]) -> Result<LockGuard, LockError>;
}

/// Release hook a provider installs into the guards it issues.
pub trait LockRelease: Send + Sync {
    fn release(&self, names: &[String]);
}

/// Held locks. Released exactly once, on drop or via [`LockGuard::release`].
pub struct LockGuard {
    names: Vec<String>,
    releaser: Option<Arc<dyn LockRelease>>,
}

impl LockGuard {
    pub fn new(names: Vec<String>, releaser: Arc<dyn LockRelease>) -> Self {
        Self {
            names,
            releaser: Some(releaser),
        }
    }

    /// A guard holding nothing.
    pub fn empty() -> Self {
        Self {
            names: Vec::new(),
            releaser: None,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Release the locks now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            releaser.release(&self.names);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("names", &self.names)
            .field("held", &self.releaser.is_some())
            .finish()
    }
}

// ============================================================================
// IN-PROCESS PROVIDER
// ============================================================================

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<BTreeSet<String>>,
    freed: Condvar,
}

impl LockRelease for LockTable {
    fn release(&self, names: &[String]) {
        match self.held.lock() {
            Ok(mut held) => {
                for name in names {
                    held.remove(name);
                }
            }
            Err(_) => {
                tracing::warn!(?names, "Lock table poisoned during release");
                return;
            }
        }
        self.freed.notify_all();
    }
}

/// Lock provider for a single process.
///
/// All names of one request are taken together, so two requests can never
/// hold halves of each other's sets.
#[derive(Debug, Clone, Default)]
pub struct InProcessLockProvider {
    table: Arc<LockTable>,
    timeout: Option<Duration>,
}

impl InProcessLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail acquisition after waiting this long instead of blocking forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of names currently held.
    pub fn held_count(&self) -> usize {
        self.table.held.lock().map(|held| held.len()).unwrap_or(0)
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.table
            .held
            .lock()
            .map(|held| held.contains(name))
            .unwrap_or(false)
    }
}

impl LockProvider for InProcessLockProvider {
    fn lock(&self, names: &[String]) -> Result<LockGuard, LockError> {
        let wanted: BTreeSet<String> = names.iter().cloned().collect();
        if wanted.is_empty() {
            return Ok(LockGuard::empty());
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut held = self.table.held.lock().map_err(|_| LockError::Poisoned)?;

        while wanted.iter().any(|name| held.contains(name)) {
            held = match deadline {
                None => self.table.freed.wait(held).map_err(|_| LockError::Poisoned)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::AcquisitionFailed {
                            names: wanted.into_iter().collect(),
                            reason: "timed out".to_string(),
                        });
                    }
                    self.table
                        .freed
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| LockError::Poisoned)?
                        .0
                }
            };
        }

        held.extend(wanted.iter().cloned());
        drop(held);

        let table: Arc<dyn LockRelease> = self.table.clone();
        Ok(LockGuard::new(wanted.into_iter().collect(), table))
    }
}
