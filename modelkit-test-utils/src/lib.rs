//! modelkit Test Utilities
//!
//! Centralized test infrastructure for the modelkit workspace:
//! - Fixture entities (`Account`, and the `Author`/`Post` relation graph)
//! - A fault-injecting store wrapper for exercising retry paths
//! - Proptest generators
//! - Tracing setup for tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// Re-export the in-memory store from its source crate
pub use modelkit_storage::{InMemoryCacheBackend, InMemoryStore, StoreStats};

// Re-export core types for convenience
pub use modelkit_core::{
    Entity, EntityKind, ModelConfig, ModelError, ModelResult, StoreError, StoreResult, Timestamp,
    UniqueField,
};

pub use fixtures::{Account, Author, Post};

use modelkit_storage::{EntityStore, Merged};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every
/// test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Store wrapper that fails a configured number of writes before delegating.
///
/// Merges fail with `ConcurrentModification`, inserts with a primary-key
/// `UniqueConstraintViolation`: the two errors the update engine retries.
/// Injected failures never reach the inner store.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: Arc<S>,
    merge_failures: AtomicU32,
    insert_failures: AtomicU32,
    injected: AtomicU32,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            merge_failures: AtomicU32::new(0),
            insert_failures: AtomicU32::new(0),
            injected: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Fail the next `count` merges.
    pub fn fail_merges(&self, count: u32) {
        self.merge_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` inserts.
    pub fn fail_inserts(&self, count: u32) {
        self.insert_failures.store(count, Ordering::SeqCst);
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take(&self, counter: &AtomicU32) -> bool {
        let taken = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.injected.fetch_add(1, Ordering::SeqCst);
        }
        taken
    }
}

impl<E: Entity, S: EntityStore<E>> EntityStore<E> for FlakyStore<S> {
    fn fetch_by_id(&self, key: &E::Key) -> StoreResult<Option<E>> {
        self.inner.fetch_by_id(key)
    }

    fn fetch_by_ids(&self, keys: &BTreeSet<E::Key>) -> StoreResult<HashMap<E::Key, E>> {
        self.inner.fetch_by_ids(keys)
    }

    fn persist_new(&self, entity: E) -> StoreResult<E> {
        if self.take(&self.insert_failures) {
            return Err(StoreError::UniqueConstraintViolation {
                kind: E::entity_kind(),
                field: E::key_column().to_string(),
                is_primary_key: true,
            });
        }
        self.inner.persist_new(entity)
    }

    fn merge_existing(&self, entity: E) -> StoreResult<Merged<E>> {
        if self.take(&self.merge_failures) {
            return Err(StoreError::ConcurrentModification {
                kind: E::entity_kind(),
                key: entity
                    .key()
                    .map(|k| k.to_string())
                    .unwrap_or_default(),
            });
        }
        self.inner.merge_existing(entity)
    }

    fn delete(&self, entity: &E) -> StoreResult<()> {
        self.inner.delete(entity)
    }

    fn find_by_unique(&self, column: &str, value: &str) -> StoreResult<Option<E::Key>> {
        self.inner.find_by_unique(column, value)
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities for common testing scenarios.

    use super::*;
    use modelkit_lazy::{reachable, Cardinality, Reachable, Ref, Schema, Visitor, Walkable};
    use serde::Serialize;
    use std::sync::OnceLock;

    pub const ACCOUNT: EntityKind = EntityKind::new("account");
    pub const AUTHOR: EntityKind = EntityKind::new("author");
    pub const POST: EntityKind = EntityKind::new("post");

    /// Versioned entity with a unique email and created/updated stamps.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Account {
        pub id: Option<i64>,
        pub version: i64,
        pub owner: String,
        pub email: String,
        pub balance: i64,
        pub created_at: Option<Timestamp>,
        pub updated_at: Option<Timestamp>,
    }

    impl Entity for Account {
        type Key = i64;

        fn entity_kind() -> EntityKind {
            ACCOUNT
        }

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn set_key(&mut self, key: i64) {
            self.id = Some(key);
        }

        fn version(&self) -> Option<i64> {
            Some(self.version)
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }

        fn mark_created(&mut self, at: Timestamp) {
            self.created_at = Some(at);
        }

        fn mark_updated(&mut self, at: Timestamp) {
            self.updated_at = Some(at);
        }

        fn unique_fields(&self) -> Vec<UniqueField> {
            vec![UniqueField::new("email", self.email.clone())]
        }
    }

    /// Unsaved account for `owner` with email `<owner>@example.com`.
    pub fn account(owner: &str, balance: i64) -> Account {
        Account {
            id: None,
            version: 0,
            owner: owner.to_string(),
            email: format!("{}@example.com", owner),
            balance,
            created_at: None,
            updated_at: None,
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Author {
        pub id: Option<i64>,
        pub name: String,
        pub posts: Vec<Ref<Post>>,
        pub mentor: Ref<Author>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Post {
        pub id: Option<i64>,
        pub title: String,
        pub author: Ref<Author>,
    }

    impl Entity for Author {
        type Key = i64;

        fn entity_kind() -> EntityKind {
            AUTHOR
        }

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn set_key(&mut self, key: i64) {
            self.id = Some(key);
        }
    }

    impl Entity for Post {
        type Key = i64;

        fn entity_kind() -> EntityKind {
            POST
        }

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn set_key(&mut self, key: i64) {
            self.id = Some(key);
        }
    }

    impl Walkable for Author {
        fn schema(&self) -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                Schema::new("Author")
                    .relation("posts", POST, Cardinality::List)
                    .relation("mentor", AUTHOR, Cardinality::Single)
                    .scenario("mentorship", &["mentor"])
            })
        }

        fn visit_field(&mut self, name: &str, visitor: &mut dyn Visitor) {
            match name {
                "posts" => self.posts.reach(visitor),
                "mentor" => self.mentor.reach(visitor),
                _ => {}
            }
        }
    }

    impl Walkable for Post {
        fn schema(&self) -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                Schema::new("Post").relation("author", AUTHOR, Cardinality::Single)
            })
        }

        fn visit_field(&mut self, name: &str, visitor: &mut dyn Visitor) {
            if name == "author" {
                self.author.reach(visitor);
            }
        }
    }

    reachable!(Author, Post);

    /// Author `id`, optionally mentored by `mentor`, referencing `posts`.
    pub fn author(id: i64, mentor: Option<i64>, posts: &[i64]) -> Author {
        Author {
            id: Some(id),
            name: format!("author-{}", id),
            posts: posts.iter().map(|p| Ref::pending(*p)).collect(),
            mentor: match mentor {
                Some(mentor) => Ref::pending(mentor),
                None => Ref::Null,
            },
        }
    }

    pub fn post(id: i64, author: i64) -> Post {
        Post {
            id: Some(id),
            title: format!("post-{}", id),
            author: Ref::pending(author),
        }
    }

    /// In-memory store seeded with `rows`.
    pub fn seeded_store<E: Entity>(
        rows: impl IntoIterator<Item = E>,
    ) -> StoreResult<Arc<InMemoryStore<E>>> {
        let store = Arc::new(InMemoryStore::new());
        store.seed(rows)?;
        Ok(store)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating modelkit fixtures.

    use super::fixtures::{account, Account};
    use super::*;
    use proptest::prelude::*;

    /// Lowercase owner name; the account email is derived from it.
    pub fn arb_owner() -> impl Strategy<Value = String> {
        "[a-z]{3,10}"
    }

    pub fn arb_balance() -> impl Strategy<Value = i64> {
        -1_000_000i64..1_000_000
    }

    /// Unsaved account.
    pub fn arb_account() -> impl Strategy<Value = Account> {
        (arb_owner(), arb_balance()).prop_map(|(owner, balance)| account(&owner, balance))
    }

    /// Balance adjustments applied one update at a time.
    pub fn arb_deltas() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(-1_000i64..1_000, 1..20)
    }

    /// Whole-second UTC timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or(chrono::DateTime::UNIX_EPOCH)
        })
    }

    /// Relation keys of an acyclic author/post graph: `(post id, author id)`.
    pub fn arb_post_authors() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec(1i64..10, 1..30).prop_map(|authors| {
            authors
                .into_iter()
                .enumerate()
                .map(|(i, author)| (100 + i as i64, author))
                .collect()
        })
    }
}
