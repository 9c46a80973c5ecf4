//! Pre-write uniqueness checks serialized by named locks.
//!
//! The store enforces uniqueness on commit, but a violation there is only
//! detected after the write has been attempted. The guard checks changed
//! unique values up front, under locks named after each value, so two writers
//! claiming the same value cannot both pass the check.

use std::sync::Arc;

use modelkit_core::{
    Entity, InProcessLockProvider, LockGuard, LockProvider, ModelResult, StoreError, UniqueField,
};
use modelkit_storage::EntityStore;
use tracing::debug;

#[derive(Clone)]
pub struct UniquenessGuard {
    provider: Arc<dyn LockProvider>,
}

impl Default for UniquenessGuard {
    fn default() -> Self {
        Self::new(Arc::new(InProcessLockProvider::new()))
    }
}

impl std::fmt::Debug for UniquenessGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniquenessGuard").finish_non_exhaustive()
    }
}

impl UniquenessGuard {
    pub fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self { provider }
    }

    /// Unique fields that need checking before writing `after`.
    ///
    /// Every field on insert; otherwise only fields whose value differs from
    /// `before`.
    pub fn changed_fields<E: Entity>(before: Option<&E>, after: &E) -> Vec<UniqueField> {
        let fields = after.unique_fields();
        let Some(before) = before else {
            return fields;
        };
        let previous = before.unique_fields();
        fields
            .into_iter()
            .filter(|field| !previous.contains(field))
            .collect()
    }

    /// Sorted, de-duplicated lock names for `fields`.
    pub fn lock_names<E: Entity>(fields: &[UniqueField]) -> Vec<String> {
        let mut names: Vec<String> = fields
            .iter()
            .map(|f| format!("{}:{}:{}", E::entity_kind(), f.column, f.value))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Lock and check the unique values `after` is about to claim.
    ///
    /// The returned guard must be held until the write has committed. Fails
    /// with a non-primary-key `UniqueConstraintViolation` when another row
    /// already holds one of the values.
    pub fn acquire<E, S>(&self, store: &S, before: Option<&E>, after: &E) -> ModelResult<LockGuard>
    where
        E: Entity,
        S: EntityStore<E> + ?Sized,
    {
        let fields = Self::changed_fields(before, after);
        if fields.is_empty() {
            return Ok(LockGuard::empty());
        }

        let names = Self::lock_names::<E>(&fields);
        let guard = self.provider.lock(&names)?;

        let own_key = after.key();
        for field in &fields {
            if let Some(owner) = store.find_by_unique(&field.column, &field.value)? {
                if own_key.as_ref() != Some(&owner) {
                    debug!(
                        kind = %E::entity_kind(),
                        column = %field.column,
                        owner = %owner,
                        "Unique value already taken"
                    );
                    guard.release();
                    return Err(StoreError::UniqueConstraintViolation {
                        kind: E::entity_kind(),
                        field: field.column.clone(),
                        is_primary_key: false,
                    }
                    .into());
                }
            }
        }

        Ok(guard)
    }
}
