//! Declared relation schemas.
//!
//! A walkable type describes its fields once, in a [`Schema`]. The walker only
//! ever looks at declared fields, so undeclared fields are invisible to lazy
//! loading.

use std::collections::BTreeMap;

use modelkit_core::EntityKind;

/// Entity family a relation points at. Loaders are registered per target.
pub type TargetType = EntityKind;

/// Scenario consulted when the walker has none, or its own is not declared.
pub const DEFAULT_SCENARIO: &str = "default";

/// Scenario field entry meaning "every declared field".
pub const ALL_FIELDS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// `Ref<T>`
    Single,
    /// `Vec<Ref<T>>`
    List,
    /// `BTreeMap<_, Ref<T>>` or `HashMap<_, Ref<T>>`
    MapValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub target: TargetType,
    pub cardinality: Cardinality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Field holds references to rows of another entity family.
    Relation(RelationDescriptor),
    /// Field holds walkable values inline.
    Nested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub type_name: &'static str,
    pub fields: Vec<FieldSpec>,
    /// Named field selections.
    pub scenarios: BTreeMap<String, Vec<String>>,
}

impl Schema {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
            scenarios: BTreeMap::new(),
        }
    }

    pub fn relation(
        mut self,
        name: &'static str,
        target: TargetType,
        cardinality: Cardinality,
    ) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind: FieldKind::Relation(RelationDescriptor {
                target,
                cardinality,
            }),
        });
        self
    }

    pub fn nested(mut self, name: &'static str) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind: FieldKind::Nested,
        });
        self
    }

    pub fn scenario(mut self, name: impl Into<String>, fields: &[&str]) -> Self {
        self.scenarios
            .insert(name.into(), fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields to walk under `scenario`.
    ///
    /// Resolution order: the named scenario, then [`DEFAULT_SCENARIO`], then
    /// every declared field. A selection containing [`ALL_FIELDS`] selects
    /// every declared field. Names that are not declared are skipped.
    pub fn fields_for(&self, scenario: Option<&str>) -> Vec<&FieldSpec> {
        let selection = scenario
            .and_then(|name| self.scenarios.get(name))
            .or_else(|| self.scenarios.get(DEFAULT_SCENARIO));

        match selection {
            Some(names) if !names.iter().any(|n| n == ALL_FIELDS) => self
                .fields
                .iter()
                .filter(|f| names.iter().any(|n| n == f.name))
                .collect(),
            _ => self.fields.iter().collect(),
        }
    }
}
