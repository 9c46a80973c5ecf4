//! Outcome types for optimistic writes.

use modelkit_core::{ChangeKind, Entity, EntityKind};

/// What a mutator decided to do with the entity it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// The entity was modified and should be written.
    Changed,
    /// Nothing to write; the engine returns the fetched state.
    Unchanged,
    /// Abandon the operation without writing or retrying.
    Cancel,
}

impl From<bool> for Mutation {
    fn from(changed: bool) -> Self {
        if changed {
            Mutation::Changed
        } else {
            Mutation::Unchanged
        }
    }
}

/// Mutators that return nothing always count as a change.
impl From<()> for Mutation {
    fn from(_: ()) -> Self {
        Mutation::Changed
    }
}

/// Result of one optimistic operation.
///
/// When `is_updated` is false, `before` and `after` hold the same state.
/// Inserts have no `before`; deletes have no `after`.
#[derive(Debug, Clone, PartialEq)]
pub struct OptResult<E> {
    pub kind: EntityKind,
    pub before: Option<E>,
    pub after: Option<E>,
    pub is_updated: bool,
    pub is_inserted: bool,
    pub is_deleted: bool,
    /// Microseconds since the epoch, strictly increasing per factory.
    pub timestamp: i64,
    canceled: bool,
}

impl<E: Entity> OptResult<E> {
    /// The result of a mutator that asked to cancel.
    pub fn canceled(kind: EntityKind) -> Self {
        Self {
            kind,
            before: None,
            after: None,
            is_updated: false,
            is_inserted: false,
            is_deleted: false,
            timestamp: 0,
            canceled: true,
        }
    }

    pub(crate) fn unchanged(state: Option<E>, timestamp: i64) -> Self {
        Self {
            kind: E::entity_kind(),
            before: state.clone(),
            after: state,
            is_updated: false,
            is_inserted: false,
            is_deleted: false,
            timestamp,
            canceled: false,
        }
    }

    pub(crate) fn inserted(after: E, timestamp: i64) -> Self {
        Self {
            kind: E::entity_kind(),
            before: None,
            after: Some(after),
            is_updated: true,
            is_inserted: true,
            is_deleted: false,
            timestamp,
            canceled: false,
        }
    }

    pub(crate) fn updated(before: E, after: E, timestamp: i64) -> Self {
        Self {
            kind: E::entity_kind(),
            before: Some(before),
            after: Some(after),
            is_updated: true,
            is_inserted: false,
            is_deleted: false,
            timestamp,
            canceled: false,
        }
    }

    pub(crate) fn deleted(before: E, timestamp: i64) -> Self {
        Self {
            kind: E::entity_kind(),
            before: Some(before),
            after: None,
            is_updated: true,
            is_inserted: false,
            is_deleted: true,
            timestamp,
            canceled: false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Key of the affected entity.
    pub fn key(&self) -> Option<E::Key> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .and_then(|e| e.key())
    }

    /// The change this result represents, if anything was written.
    pub fn change_kind(&self) -> Option<ChangeKind> {
        if !self.is_updated {
            None
        } else if self.is_inserted {
            Some(ChangeKind::Insert)
        } else if self.is_deleted {
            Some(ChangeKind::Delete)
        } else {
            Some(ChangeKind::Update)
        }
    }

    /// The committed state, consuming the result.
    pub fn into_after(self) -> Option<E> {
        self.after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelkit_test_utils::fixtures::account;
    use modelkit_test_utils::Account;

    #[test]
    fn test_bool_conversion() {
        assert_eq!(Mutation::from(true), Mutation::Changed);
        assert_eq!(Mutation::from(false), Mutation::Unchanged);
        assert_eq!(Mutation::from(()), Mutation::Changed);
    }

    #[test]
    fn test_canceled_is_distinguished() {
        let result = OptResult::<Account>::canceled(Account::entity_kind());
        assert!(result.is_canceled());
        assert!(!result.is_updated);
        assert_eq!(result.change_kind(), None);
        assert_eq!(result.key(), None);
    }

    #[test]
    fn test_unchanged_snapshots_match() {
        let mut state = account("ann", 10);
        state.id = Some(1);
        let result = OptResult::unchanged(Some(state.clone()), 5);
        assert_eq!(result.before, result.after);
        assert_eq!(result.timestamp, 5);
        assert!(!result.is_canceled());
        assert_eq!(result.change_kind(), None);
    }

    #[test]
    fn test_change_kinds() {
        let mut state = account("ann", 10);
        state.id = Some(1);

        assert_eq!(
            OptResult::inserted(state.clone(), 1).change_kind(),
            Some(ChangeKind::Insert)
        );
        assert_eq!(
            OptResult::updated(state.clone(), state.clone(), 1).change_kind(),
            Some(ChangeKind::Update)
        );
        let deleted = OptResult::deleted(state, 1);
        assert_eq!(deleted.change_kind(), Some(ChangeKind::Delete));
        assert_eq!(deleted.key(), Some(1));
    }
}
