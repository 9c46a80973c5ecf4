//! Entity keys and the type-erased relation key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// Primary key of an entity.
///
/// Keys must be totally ordered so that bulk fetches and lock names can be
/// produced in a stable order, and convertible to a [`RelationKey`] so the
/// lazy loader can batch them without knowing the concrete type.
pub trait EntityKey:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Build a store-assigned key from a monotonically increasing sequence.
    ///
    /// Returns `None` for key types the store cannot generate.
    fn from_sequence(sequence: u64) -> Option<Self>;

    /// Erase the key for relation bookkeeping.
    fn to_relation_key(&self) -> RelationKey;

    /// Recover a typed key from its erased form.
    fn from_relation_key(key: &RelationKey) -> Option<Self>;
}

/// Type-erased key used by relation markers and the loader registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationKey {
    Int(i64),
    Str(String),
    Uuid(Uuid),
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKey::Int(v) => write!(f, "{}", v),
            RelationKey::Str(v) => write!(f, "{}", v),
            RelationKey::Uuid(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for RelationKey {
    fn from(value: i64) -> Self {
        RelationKey::Int(value)
    }
}

impl From<&str> for RelationKey {
    fn from(value: &str) -> Self {
        RelationKey::Str(value.to_string())
    }
}

impl From<String> for RelationKey {
    fn from(value: String) -> Self {
        RelationKey::Str(value)
    }
}

impl From<Uuid> for RelationKey {
    fn from(value: Uuid) -> Self {
        RelationKey::Uuid(value)
    }
}

impl EntityKey for i64 {
    fn from_sequence(sequence: u64) -> Option<Self> {
        i64::try_from(sequence).ok()
    }

    fn to_relation_key(&self) -> RelationKey {
        RelationKey::Int(*self)
    }

    fn from_relation_key(key: &RelationKey) -> Option<Self> {
        match key {
            RelationKey::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl EntityKey for i32 {
    fn from_sequence(sequence: u64) -> Option<Self> {
        i32::try_from(sequence).ok()
    }

    fn to_relation_key(&self) -> RelationKey {
        RelationKey::Int(i64::from(*self))
    }

    fn from_relation_key(key: &RelationKey) -> Option<Self> {
        match key {
            RelationKey::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl EntityKey for u64 {
    fn from_sequence(sequence: u64) -> Option<Self> {
        Some(sequence)
    }

    fn to_relation_key(&self) -> RelationKey {
        // Keys beyond i64::MAX cannot be erased losslessly; fall back to text.
        match i64::try_from(*self) {
            Ok(v) => RelationKey::Int(v),
            Err(_) => RelationKey::Str(self.to_string()),
        }
    }

    fn from_relation_key(key: &RelationKey) -> Option<Self> {
        match key {
            RelationKey::Int(v) => u64::try_from(*v).ok(),
            RelationKey::Str(s) => s.parse().ok(),
            RelationKey::Uuid(_) => None,
        }
    }
}

impl EntityKey for String {
    fn from_sequence(sequence: u64) -> Option<Self> {
        Some(sequence.to_string())
    }

    fn to_relation_key(&self) -> RelationKey {
        RelationKey::Str(self.clone())
    }

    fn from_relation_key(key: &RelationKey) -> Option<Self> {
        match key {
            RelationKey::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl EntityKey for Uuid {
    /// UUIDv7 keys are timestamp-sortable; the sequence is not needed.
    fn from_sequence(_sequence: u64) -> Option<Self> {
        Some(Uuid::now_v7())
    }

    fn to_relation_key(&self) -> RelationKey {
        RelationKey::Uuid(*self)
    }

    fn from_relation_key(key: &RelationKey) -> Option<Self> {
        match key {
            RelationKey::Uuid(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i64_relation_key_roundtrip() {
        let key: i64 = 42;
        let erased = key.to_relation_key();
        assert_eq!(erased, RelationKey::Int(42));
        assert_eq!(i64::from_relation_key(&erased), Some(42));
    }

    #[test]
    fn test_mismatched_relation_key_is_rejected() {
        assert_eq!(i64::from_relation_key(&RelationKey::from("abc")), None);
        assert_eq!(String::from_relation_key(&RelationKey::Int(1)), None);
        assert_eq!(Uuid::from_relation_key(&RelationKey::Int(1)), None);
    }

    #[test]
    fn test_u64_above_i64_max_erases_to_text() {
        let key = u64::MAX;
        let erased = key.to_relation_key();
        assert!(matches!(erased, RelationKey::Str(_)));
        assert_eq!(u64::from_relation_key(&erased), Some(u64::MAX));
    }

    #[test]
    fn test_i32_rejects_out_of_range() {
        assert_eq!(i32::from_relation_key(&RelationKey::Int(i64::MAX)), None);
        assert_eq!(i32::from_sequence(u64::MAX), None);
        assert_eq!(i32::from_sequence(7), Some(7));
    }

    #[test]
    fn test_relation_key_ordering_is_stable() {
        let mut keys = vec![
            RelationKey::from("b"),
            RelationKey::Int(3),
            RelationKey::from("a"),
            RelationKey::Int(1),
        ];
        keys.sort();
        assert_eq!(keys[0], RelationKey::Int(1));
        assert_eq!(keys[1], RelationKey::Int(3));
        assert_eq!(keys[2], RelationKey::from("a"));
    }
}
