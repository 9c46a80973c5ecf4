//! Translation of backend constraint names into uniqueness violations.
//!
//! Relational backends report a violated constraint by name only. Names are
//! expected to follow the PostgreSQL defaults:
//!
//! | Constraint              | Meaning                      |
//! |-------------------------|------------------------------|
//! | `<table>_pkey`          | primary key                  |
//! | `<table>_<col>_key`     | unique column                |
//! | `<table>_<col>_idx`     | unique index on one column   |
//! | `<table>_<c1>_<c2>_key` | composite unique constraint  |

use modelkit_core::{Entity, EntityKind, StoreError};

#[derive(Debug, Clone)]
pub struct ConstraintTranslator {
    kind: EntityKind,
    table: String,
    key_column: String,
}

impl ConstraintTranslator {
    pub fn new(kind: EntityKind, table: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            key_column: key_column.into(),
        }
    }

    /// Translator for an entity whose table is named after its kind.
    pub fn for_entity<E: Entity>() -> Self {
        Self::new(E::entity_kind(), E::entity_kind().as_str(), E::key_column())
    }

    pub fn primary_key_constraint(&self) -> String {
        format!("{}_pkey", self.table)
    }

    pub fn unique_constraint(&self, column: &str) -> String {
        format!("{}_{}_key", self.table, column)
    }

    /// Map a violated constraint name to a store error.
    ///
    /// `columns` lists the declared-unique columns of the table; it is used to
    /// split composite names whose columns themselves contain underscores.
    /// Names that do not belong to this table become `Backend` errors so they
    /// are never mistaken for a retryable conflict.
    pub fn translate(&self, constraint: &str, columns: &[String]) -> StoreError {
        let Some(rest) = constraint
            .strip_prefix(self.table.as_str())
            .and_then(|r| r.strip_prefix('_'))
        else {
            return self.unrecognized(constraint);
        };

        if rest == "pkey" {
            return self.violation(self.key_column.clone(), true);
        }

        let Some(body) = rest
            .strip_suffix("_key")
            .or_else(|| rest.strip_suffix("_idx"))
        else {
            return self.unrecognized(constraint);
        };

        if body.is_empty() {
            return self.unrecognized(constraint);
        }

        let field = split_columns(body, columns)
            .map(|cols| cols.join(","))
            .unwrap_or_else(|| body.to_string());
        let is_primary_key = field == self.key_column;
        self.violation(field, is_primary_key)
    }

    fn violation(&self, field: String, is_primary_key: bool) -> StoreError {
        StoreError::UniqueConstraintViolation {
            kind: self.kind,
            field,
            is_primary_key,
        }
    }

    fn unrecognized(&self, constraint: &str) -> StoreError {
        StoreError::Backend {
            reason: format!(
                "unrecognized constraint {} on table {}",
                constraint, self.table
            ),
        }
    }
}

/// Split `body` into a sequence of known column names, longest match first.
fn split_columns(body: &str, columns: &[String]) -> Option<Vec<String>> {
    if body.is_empty() {
        return Some(Vec::new());
    }

    let mut candidates: Vec<&String> = columns.iter().collect();
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));

    for column in candidates {
        if body == column.as_str() {
            return Some(vec![column.clone()]);
        }
        if let Some(tail) = body
            .strip_prefix(column.as_str())
            .and_then(|t| t.strip_prefix('_'))
        {
            if let Some(mut rest) = split_columns(tail, columns) {
                rest.insert(0, column.clone());
                return Some(rest);
            }
        }
    }
    None
}
