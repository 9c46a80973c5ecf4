//! Breadth-first graph walker.

use crate::loader::Resolved;
use crate::reach::{Visitor, Walkable};
use crate::registry::Registry;
use crate::schema::{FieldKind, TargetType};
use crate::slot::{Injection, RelationSlot};

/// Walks a graph of [`Walkable`] values along the fields selected by a
/// scenario.
///
/// Loaded relation targets are descended into with their own schema, so each
/// pass reaches one relation hop further than the previous one.
#[derive(Debug, Clone, Default)]
pub struct GraphWalker {
    scenario: Option<String>,
}

impl GraphWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenario(scenario: impl Into<String>) -> Self {
        Self {
            scenario: Some(scenario.into()),
        }
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    /// Clear `registry` and fill it with every pending key reachable from
    /// `root`.
    pub fn apply(&self, root: &mut dyn Walkable, registry: &mut Registry) {
        registry.clear();
        let mut visitor = WalkVisitor {
            walker: self,
            pass: Pass::Collect(registry),
            target: None,
        };
        visitor.descend(root);
    }

    /// Fill pending slots from `resolved`. Returns the number of slots that
    /// became loaded.
    pub fn inject(&self, root: &mut dyn Walkable, resolved: &Resolved) -> usize {
        let mut visitor = WalkVisitor {
            walker: self,
            pass: Pass::Inject {
                resolved,
                loaded: 0,
            },
            target: None,
        };
        visitor.descend(root);
        match visitor.pass {
            Pass::Inject { loaded, .. } => loaded,
            Pass::Collect(_) => 0,
        }
    }
}

enum Pass<'a> {
    Collect(&'a mut Registry),
    Inject { resolved: &'a Resolved, loaded: usize },
}

struct WalkVisitor<'a> {
    walker: &'a GraphWalker,
    pass: Pass<'a>,
    /// Target of the relation field currently being visited.
    target: Option<TargetType>,
}

impl WalkVisitor<'_> {
    fn descend(&mut self, node: &mut dyn Walkable) {
        let schema = node.schema();
        for field in schema.fields_for(self.walker.scenario()) {
            let outer = self.target;
            self.target = match field.kind {
                FieldKind::Relation(descriptor) => Some(descriptor.target),
                FieldKind::Nested => None,
            };
            node.visit_field(field.name, self);
            self.target = outer;
        }
    }
}

impl Visitor for WalkVisitor<'_> {
    fn relation(&mut self, slot: &mut dyn RelationSlot) {
        // A slot outside a declared relation field has no target to load.
        let Some(target) = self.target else {
            return;
        };

        match &mut self.pass {
            Pass::Collect(registry) => {
                if let Some(key) = slot.pending_key() {
                    registry.add(target, key.clone());
                    return;
                }
            }
            Pass::Inject { resolved, loaded } => match slot.inject(target, resolved) {
                Injection::Loaded => {
                    *loaded += 1;
                    return;
                }
                Injection::Dangling => return,
                Injection::Untouched => {}
            },
        }

        if let Some(node) = slot.loaded_node() {
            self.descend(node);
        }
    }

    fn node(&mut self, node: &mut dyn Walkable) {
        self.descend(node);
    }
}
