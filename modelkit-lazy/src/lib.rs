//! modelkit Lazy - Batched Relation Loading
//!
//! Entities reference each other through [`Ref`] slots that start out
//! [`Ref::Pending`]. [`LazyLoadManager`] resolves them breadth-first: every
//! pass collects the pending keys of the whole graph, fetches them with one
//! batch per target entity family, and injects the results. The classic
//! one-query-per-reference pattern becomes one query per family per hop.
//!
//! # Declaring a graph
//!
//! Walkable types declare their relation fields in a [`Schema`] and expose
//! them by name through [`Walkable::visit_field`]. Named scenarios select a
//! subset of fields to load.
//!
//! # Passes
//!
//! ```text
//! pass 1: Post.author ──→ [author batch]
//! pass 2: Author.posts ─→ [post batch]
//! pass 3: Post.author ──→ [author batch]   (cycles repeat until the cap)
//! ```

pub mod loader;
pub mod manager;
pub mod reach;
pub mod registry;
pub mod schema;
pub mod slot;
pub mod walker;

pub use loader::{BatchLoader, CacheLoader, FnLoader, LoadedValue, Loaders, Resolved};
pub use manager::{LazyLoadManager, LoadReport};
pub use reach::{Reachable, Visitor, Walkable};
pub use registry::Registry;
pub use schema::{
    Cardinality, FieldKind, FieldSpec, RelationDescriptor, Schema, TargetType, ALL_FIELDS,
    DEFAULT_SCENARIO,
};
pub use slot::{Injection, Ref, RelationSlot};
pub use walker::GraphWalker;
