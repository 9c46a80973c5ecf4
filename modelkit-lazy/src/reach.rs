//! Traversal traits.
//!
//! [`Walkable`] types expose their declared fields by name; [`Reachable`]
//! covers everything a field can hold (relation slots, containers of slots,
//! nested walkable values) and reports it to a [`Visitor`].

use std::collections::{BTreeMap, HashMap};

use crate::schema::Schema;
use crate::slot::{RelationSlot, Ref};

/// A type whose relations can be walked.
///
/// `visit_field` must call [`Reachable::reach`] on the field named `name` and
/// do nothing for names it does not know.
///
/// ```ignore
/// impl Walkable for Post {
///     fn schema(&self) -> &'static Schema {
///         static SCHEMA: OnceLock<Schema> = OnceLock::new();
///         SCHEMA.get_or_init(|| {
///             Schema::new("Post").relation("author", AUTHOR, Cardinality::Single)
///         })
///     }
///
///     fn visit_field(&mut self, name: &str, visitor: &mut dyn Visitor) {
///         if name == "author" {
///             self.author.reach(visitor);
///         }
///     }
/// }
/// reachable!(Post);
/// ```
pub trait Walkable {
    fn schema(&self) -> &'static Schema;

    fn visit_field(&mut self, name: &str, visitor: &mut dyn Visitor);
}

pub trait Visitor {
    fn relation(&mut self, slot: &mut dyn RelationSlot);

    fn node(&mut self, node: &mut dyn Walkable);
}

pub trait Reachable {
    fn reach(&mut self, visitor: &mut dyn Visitor);
}

impl<T> Reachable for Ref<T>
where
    T: Walkable + Clone + Send + Sync + 'static,
{
    fn reach(&mut self, visitor: &mut dyn Visitor) {
        visitor.relation(self);
    }
}

impl<T: Reachable> Reachable for Vec<T> {
    fn reach(&mut self, visitor: &mut dyn Visitor) {
        for item in self.iter_mut() {
            item.reach(visitor);
        }
    }
}

impl<T: Reachable> Reachable for Option<T> {
    fn reach(&mut self, visitor: &mut dyn Visitor) {
        if let Some(item) = self {
            item.reach(visitor);
        }
    }
}

impl<T: Reachable + ?Sized> Reachable for Box<T> {
    fn reach(&mut self, visitor: &mut dyn Visitor) {
        (**self).reach(visitor);
    }
}

impl<K, T: Reachable> Reachable for BTreeMap<K, T> {
    fn reach(&mut self, visitor: &mut dyn Visitor) {
        for item in self.values_mut() {
            item.reach(visitor);
        }
    }
}

impl<K, T: Reachable, H> Reachable for HashMap<K, T, H> {
    fn reach(&mut self, visitor: &mut dyn Visitor) {
        for item in self.values_mut() {
            item.reach(visitor);
        }
    }
}

/// Implement [`Reachable`] for walkable types so they can be nested inside
/// other walkable types and containers.
#[macro_export]
macro_rules! reachable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Reachable for $ty {
                fn reach(&mut self, visitor: &mut dyn $crate::Visitor) {
                    visitor.node(self);
                }
            }
        )+
    };
}
