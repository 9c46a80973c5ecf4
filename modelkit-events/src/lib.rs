//! modelkit Events - Entity Change Notification
//!
//! The update engine posts one [`EntityChanged`] per committed change, after
//! the store write has returned. Delivery is fire-and-forget and at most
//! once: a notifier that cannot deliver drops the event, and the engine never
//! waits on listeners.
//!
//! # Notifiers
//!
//! - [`NoopNotifier`]: discards everything
//! - [`RecordingNotifier`]: keeps every event in memory, for tests
//! - [`BroadcastNotifier`]: fans events out over a tokio broadcast channel

mod notifier;

pub use notifier::{BroadcastNotifier, EventNotifier, NoopNotifier, RecordingNotifier};

pub use modelkit_core::ChangeKind;

use modelkit_core::{Entity, EntityKind};
use serde::Serialize;

/// A committed change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityChanged<E> {
    pub kind: EntityKind,
    pub change: ChangeKind,
    /// State before the change; `None` for inserts.
    pub before: Option<E>,
    /// State after the change; `None` for deletes.
    pub after: Option<E>,
    /// Commit time in microseconds since the epoch.
    pub timestamp: i64,
}

impl<E: Entity> EntityChanged<E> {
    pub fn new(change: ChangeKind, before: Option<E>, after: Option<E>, timestamp: i64) -> Self {
        Self {
            kind: E::entity_kind(),
            change,
            before,
            after,
            timestamp,
        }
    }

    /// Key of the changed entity, taken from whichever snapshot exists.
    pub fn key(&self) -> Option<E::Key> {
        self.after
            .as_ref()
            .and_then(|e| e.key())
            .or_else(|| self.before.as_ref().and_then(|e| e.key()))
    }
}
