//! Error types for modelkit operations

use crate::EntityKind;
use thiserror::Error;

/// Storage layer errors.
///
/// `ConcurrentModification` and `UniqueConstraintViolation` are deliberately
/// separate variants: the update engine retries the first and (apart from
/// primary-key races) surfaces the second.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unique constraint violated on {kind}.{field} (primary key: {is_primary_key})")]
    UniqueConstraintViolation {
        kind: EntityKind,
        field: String,
        is_primary_key: bool,
    },

    #[error("Concurrent modification of {kind} with key {key}")]
    ConcurrentModification { kind: EntityKind, key: String },

    #[error("Store backend failure: {reason}")]
    Backend { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether the update engine may retry the write that produced this error.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrentModification { .. }
                | StoreError::UniqueConstraintViolation {
                    is_primary_key: true,
                    ..
                }
        )
    }
}

/// Optimistic update engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Entity not found: {kind} with key {key}")]
    EntityNotFound { kind: EntityKind, key: String },

    #[error("Optimistic update of {kind} with key {key} failed after {attempts} attempts")]
    OptimisticUpdateFailed {
        kind: EntityKind,
        key: String,
        attempts: u32,
    },

    #[error("Optimistic update of {kind} attempted inside an externally managed transaction")]
    AmbientTransaction { kind: EntityKind },

    #[error("Optimistic update of {kind} with key {key} was interrupted")]
    Interrupted { kind: EntityKind, key: String },
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock acquisition failed for {names:?}: {reason}")]
    AcquisitionFailed { names: Vec<String>, reason: String },

    #[error("Lock table poisoned")]
    Poisoned,
}

/// Lazy-load errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("No loader registered for relation target {target}")]
    MissingLoader { target: String },

    #[error("Loader for {target} failed: {reason}")]
    LoaderFailed { target: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all modelkit errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for modelkit operations.
pub type ModelResult<T> = Result<T, ModelError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: EntityKind = EntityKind::new("account");

    #[test]
    fn test_store_error_display_unique_violation() {
        let err = StoreError::UniqueConstraintViolation {
            kind: ACCOUNT,
            field: "email".to_string(),
            is_primary_key: false,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("account.email"));
        assert!(msg.contains("primary key: false"));
    }

    #[test]
    fn test_retryable_conflicts() {
        let conflict = StoreError::ConcurrentModification {
            kind: ACCOUNT,
            key: "1".to_string(),
        };
        assert!(conflict.is_retryable_conflict());

        let pk = StoreError::UniqueConstraintViolation {
            kind: ACCOUNT,
            field: "id".to_string(),
            is_primary_key: true,
        };
        assert!(pk.is_retryable_conflict());

        let column = StoreError::UniqueConstraintViolation {
            kind: ACCOUNT,
            field: "email".to_string(),
            is_primary_key: false,
        };
        assert!(!column.is_retryable_conflict());

        let backend = StoreError::Backend {
            reason: "connection reset".to_string(),
        };
        assert!(!backend.is_retryable_conflict());
        assert!(!StoreError::LockPoisoned.is_retryable_conflict());
    }

    #[test]
    fn test_update_error_display_exhausted() {
        let err = UpdateError::OptimisticUpdateFailed {
            kind: ACCOUNT,
            key: "7".to_string(),
            attempts: 20,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("account"));
        assert!(msg.contains("7"));
        assert!(msg.contains("20 attempts"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_iterations".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_iterations"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_model_error_from_variants() {
        let store = ModelError::from(StoreError::LockPoisoned);
        assert!(matches!(store, ModelError::Store(_)));

        let update = ModelError::from(UpdateError::AmbientTransaction { kind: ACCOUNT });
        assert!(matches!(update, ModelError::Update(_)));

        let lock = ModelError::from(LockError::Poisoned);
        assert!(matches!(lock, ModelError::Lock(_)));

        let load = ModelError::from(LoadError::MissingLoader {
            target: "user".to_string(),
        });
        assert!(matches!(load, ModelError::Load(_)));

        let config = ModelError::from(ConfigError::MissingRequired {
            field: "max_iterations".to_string(),
        });
        assert!(matches!(config, ModelError::Config(_)));
    }
}
