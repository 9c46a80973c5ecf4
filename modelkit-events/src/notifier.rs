use std::sync::Mutex;

use modelkit_core::Entity;
use tokio::sync::broadcast;
use tracing::trace;

use crate::EntityChanged;

/// Sink for committed entity changes.
///
/// `post` must not block on listeners and must not fail the caller; an event
/// that cannot be delivered is dropped.
pub trait EventNotifier<E: Entity>: Send + Sync {
    fn post(&self, event: EntityChanged<E>);
}

impl<E: Entity, N: EventNotifier<E> + ?Sized> EventNotifier<E> for std::sync::Arc<N> {
    fn post(&self, event: EntityChanged<E>) {
        (**self).post(event)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl<E: Entity> EventNotifier<E> for NoopNotifier {
    fn post(&self, _event: EntityChanged<E>) {}
}

/// Keeps every posted event, in order.
#[derive(Debug)]
pub struct RecordingNotifier<E> {
    events: Mutex<Vec<EntityChanged<E>>>,
}

impl<E> Default for RecordingNotifier<E> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Entity> RecordingNotifier<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EntityChanged<E>> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl<E: Entity> EventNotifier<E> for RecordingNotifier<E> {
    fn post(&self, event: EntityChanged<E>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Fans events out to every live subscriber.
///
/// Slow subscribers lag and lose the oldest events, as with any tokio
/// broadcast channel. Posting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier<E> {
    sender: broadcast::Sender<EntityChanged<E>>,
}

impl<E: Entity> BroadcastNotifier<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityChanged<E>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Entity> EventNotifier<E> for BroadcastNotifier<E> {
    fn post(&self, event: EntityChanged<E>) {
        let kind = event.kind;
        let change = event.change;
        if self.sender.send(event).is_err() {
            trace!(kind = %kind, change = %change, "No subscribers for entity change");
        }
    }
}
