//! Typed relation slots.

use modelkit_core::RelationKey;
use tracing::warn;

use crate::loader::Resolved;
use crate::reach::Walkable;
use crate::schema::TargetType;

/// A reference to another entity that may not have been loaded yet.
///
/// ```text
/// Null
/// Pending(key) ── loaded ──→ Loaded(key, value)
///      └──────── missing ──→ Dangling(key)
/// ```
///
/// `Dangling` is terminal: the loader was asked for the key and did not
/// return it, so later passes do not ask again.
#[derive(Debug, Clone, PartialEq)]
pub enum Ref<T> {
    Null,
    Pending(RelationKey),
    Loaded(RelationKey, Box<T>),
    Dangling(RelationKey),
}

impl<T> Default for Ref<T> {
    fn default() -> Self {
        Ref::Null
    }
}

impl<T> Ref<T> {
    pub fn pending(key: impl Into<RelationKey>) -> Self {
        Ref::Pending(key.into())
    }

    pub fn loaded(key: impl Into<RelationKey>, value: T) -> Self {
        Ref::Loaded(key.into(), Box::new(value))
    }

    pub fn key(&self) -> Option<&RelationKey> {
        match self {
            Ref::Null => None,
            Ref::Pending(key) | Ref::Loaded(key, _) | Ref::Dangling(key) => Some(key),
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Ref::Loaded(_, value) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Ref::Loaded(_, value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Ref::Null)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Ref::Pending(_))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Ref::Loaded(..))
    }

    pub fn is_dangling(&self) -> bool {
        matches!(self, Ref::Dangling(_))
    }
}

/// Outcome of offering resolved values to one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    Loaded,
    Dangling,
    Untouched,
}

/// Type-erased view of a [`Ref`] used by the walker.
pub trait RelationSlot {
    /// Key to request, if the slot is still pending.
    fn pending_key(&self) -> Option<&RelationKey>;

    /// Fill a pending slot from `resolved`.
    fn inject(&mut self, target: TargetType, resolved: &Resolved) -> Injection;

    /// The loaded value, for descending into it.
    fn loaded_node(&mut self) -> Option<&mut dyn Walkable>;
}

impl<T> RelationSlot for Ref<T>
where
    T: Walkable + Clone + Send + Sync + 'static,
{
    fn pending_key(&self) -> Option<&RelationKey> {
        match self {
            Ref::Pending(key) => Some(key),
            _ => None,
        }
    }

    fn inject(&mut self, target: TargetType, resolved: &Resolved) -> Injection {
        let Ref::Pending(key) = &*self else {
            return Injection::Untouched;
        };
        let key = key.clone();

        match resolved.get(target, &key) {
            Some(value) => match value.downcast_ref::<T>() {
                Some(value) => {
                    *self = Ref::Loaded(key, Box::new(value.clone()));
                    Injection::Loaded
                }
                None => {
                    warn!(
                        family = %target,
                        key = %key,
                        "Loader returned a value of the wrong type"
                    );
                    *self = Ref::Dangling(key);
                    Injection::Dangling
                }
            },
            None if resolved.was_requested(target, &key) => {
                warn!(family = %target, key = %key, "Dangling relation");
                *self = Ref::Dangling(key);
                Injection::Dangling
            }
            None => Injection::Untouched,
        }
    }

    fn loaded_node(&mut self) -> Option<&mut dyn Walkable> {
        match self {
            Ref::Loaded(_, value) => Some(value.as_mut()),
            _ => None,
        }
    }
}
