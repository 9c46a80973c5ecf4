//! The optimistic update engine.
//!
//! Every write follows the same shape: fetch the current row straight from
//! the store, let the caller mutate a copy, and commit with a version check.
//! A version conflict (or a primary-key race on insert) means another writer
//! got there first, so the engine backs off for a random interval and starts
//! over from a fresh fetch.
//!
//! ```text
//! fetch ──→ mutate ──→ uniqueness guard ──→ commit ──→ invalidate ──→ notify
//!   ↑                                          │
//!   └──────────── backoff ←── conflict ────────┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use modelkit_core::{
    micros_to_timestamp, ChangeKind, Entity, LockProvider, MicroClock, ModelConfig, ModelError,
    ModelResult, UpdateError, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_ITERATIONS,
};
use modelkit_events::{EntityChanged, EventNotifier, NoopNotifier};
use modelkit_storage::{CacheBackend, EntityStore, ReadThroughCache};

use crate::backoff::{Backoff, CancelToken};
use crate::result::{Mutation, OptResult};
use crate::uniqueness::UniquenessGuard;

/// Label used in errors and logs for inserts whose key the store assigns.
const UNASSIGNED_KEY: &str = "<unassigned>";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Retry policy of a [`ModelFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryConfig {
    /// Attempts before giving up with `OptimisticUpdateFailed`.
    pub max_iterations: u32,
    /// Upper bound of the random pause between attempts.
    pub max_backoff: Duration,
    /// Run inside an externally managed transaction instead of refusing to.
    pub allow_ambient_transaction: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_backoff: DEFAULT_MAX_BACKOFF,
            allow_ambient_transaction: false,
        }
    }
}

impl From<&ModelConfig> for FactoryConfig {
    fn from(config: &ModelConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_backoff: config.max_backoff,
            allow_ambient_transaction: config.allow_ambient_transaction,
        }
    }
}

// ============================================================================
// MODEL FACTORY
// ============================================================================

/// Owns reads and optimistic writes for one entity family.
///
/// Reads go through the read-through cache; writes always start from a fresh
/// store fetch so the version they commit against is current. After a write
/// that changed something, the cache entry is invalidated and an
/// [`EntityChanged`] event is posted, in that order.
pub struct ModelFactory<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    store: Arc<S>,
    cache: ReadThroughCache<E, S, B>,
    notifier: Arc<dyn EventNotifier<E>>,
    uniqueness: UniquenessGuard,
    config: FactoryConfig,
    backoff: Backoff,
    clock: Arc<MicroClock>,
    cancel: Option<CancelToken>,
}

impl<E, S, B> ModelFactory<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    pub fn new(store: Arc<S>, backend: Arc<B>) -> Self {
        let config = FactoryConfig::default();
        Self {
            cache: ReadThroughCache::new(Arc::clone(&store), backend),
            store,
            notifier: Arc::new(NoopNotifier),
            uniqueness: UniquenessGuard::default(),
            backoff: Backoff::new(config.max_backoff),
            config,
            clock: Arc::new(MicroClock::new()),
            cancel: None,
        }
    }

    /// Build a factory from validated configuration.
    pub fn from_config(store: Arc<S>, backend: Arc<B>, config: &ModelConfig) -> ModelResult<Self> {
        config.validate()?;
        Ok(Self::new(store, backend).with_config(FactoryConfig::from(config)))
    }

    /// Replace the retry policy. At least one attempt is always made.
    pub fn with_config(mut self, mut config: FactoryConfig) -> Self {
        config.max_iterations = config.max_iterations.max(1);
        self.backoff = Backoff::new(config.max_backoff);
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier<E>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share a lock provider with other factories writing the same store.
    pub fn with_lock_provider(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.uniqueness = UniquenessGuard::new(provider);
        self
    }

    /// Share a clock so timestamps are ordered across factories.
    pub fn with_clock(mut self, clock: Arc<MicroClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn cache(&self) -> &ReadThroughCache<E, S, B> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn get(&self, key: &E::Key) -> ModelResult<Option<E>> {
        Ok(self.cache.get(key)?)
    }

    pub fn get_all(&self, keys: &BTreeSet<E::Key>) -> ModelResult<HashMap<E::Key, Option<E>>> {
        Ok(self.cache.get_all(keys)?)
    }

    pub fn invalidate(&self, key: &E::Key) -> ModelResult<()> {
        Ok(self.cache.invalidate(key, ChangeKind::Update)?)
    }

    pub fn invalidate_local(&self, key: &E::Key) -> ModelResult<()> {
        Ok(self.cache.invalidate_local(key, ChangeKind::Update)?)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Apply `mutator` to the current state of `key`.
    ///
    /// Fails with `EntityNotFound` when no such row exists.
    #[tracing::instrument(skip_all, fields(kind = %E::entity_kind(), key = %key))]
    pub fn update<M, R>(&self, key: &E::Key, mut mutator: M) -> ModelResult<OptResult<E>>
    where
        M: FnMut(&mut E) -> R,
        R: Into<Mutation>,
    {
        let mut create: Option<fn(&E::Key) -> E> = None;
        let mut mutate = |entity: &mut E| -> Mutation { mutator(entity).into() };
        let label = key.to_string();
        let result = self.with_retries(&label, || {
            self.attempt_update(key, create.as_mut(), &mut mutate)
        })?;
        self.after_commit(&result);
        Ok(result)
    }

    /// Apply `mutator` to the current state of `key`, creating it with
    /// `create` first when it does not exist.
    #[tracing::instrument(skip_all, fields(kind = %E::entity_kind(), key = %key))]
    pub fn update_or_create<C, M, R>(
        &self,
        key: &E::Key,
        create: C,
        mut mutator: M,
    ) -> ModelResult<OptResult<E>>
    where
        C: FnMut(&E::Key) -> E,
        M: FnMut(&mut E) -> R,
        R: Into<Mutation>,
    {
        let mut create = Some(create);
        let mut mutate = |entity: &mut E| -> Mutation { mutator(entity).into() };
        let label = key.to_string();
        let result = self.with_retries(&label, || {
            self.attempt_update(key, create.as_mut(), &mut mutate)
        })?;
        self.after_commit(&result);
        Ok(result)
    }

    /// Insert `entity` unless a row with its key already exists.
    ///
    /// An entity without a key always inserts and receives a store-assigned
    /// key. When the key is taken, nothing is written and the result carries
    /// the existing row with `is_updated == false`.
    #[tracing::instrument(skip_all, fields(kind = %E::entity_kind()))]
    pub fn opt_insert(&self, entity: E) -> ModelResult<OptResult<E>> {
        let label = entity
            .key()
            .map(|k| k.to_string())
            .unwrap_or_else(|| UNASSIGNED_KEY.to_string());
        let result = self.with_retries(&label, || self.attempt_insert(&entity))?;
        self.after_commit(&result);
        Ok(result)
    }

    /// Delete the current state of `key`.
    #[tracing::instrument(skip_all, fields(kind = %E::entity_kind(), key = %key))]
    pub fn delete(&self, key: &E::Key) -> ModelResult<OptResult<E>> {
        let label = key.to_string();
        let result = self.with_retries(&label, || self.attempt_delete(key))?;
        self.after_commit(&result);
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------------

    fn attempt_update<C, M>(
        &self,
        key: &E::Key,
        create: Option<&mut C>,
        mutate: &mut M,
    ) -> ModelResult<OptResult<E>>
    where
        C: FnMut(&E::Key) -> E,
        M: FnMut(&mut E) -> Mutation,
    {
        let timestamp = self.clock.tick();
        let now = micros_to_timestamp(timestamp);

        let (before, mut entity) = match self.store.fetch_by_id(key)? {
            Some(current) => (Some(current.clone()), current),
            None => {
                let Some(create) = create else {
                    return Err(self.not_found(key));
                };
                let mut created = create(key);
                created.set_key(key.clone());
                created.mark_created(now);
                (None, created)
            }
        };

        // An unchanged mutator writes nothing, even for a freshly created
        // entity.
        match mutate(&mut entity) {
            Mutation::Cancel => return Ok(OptResult::canceled(E::entity_kind())),
            Mutation::Unchanged => return Ok(OptResult::unchanged(Some(entity), timestamp)),
            Mutation::Changed => {}
        }
        entity.mark_updated(now);

        let guard = self
            .uniqueness
            .acquire(self.store.as_ref(), before.as_ref(), &entity)?;

        let result = match before {
            None => OptResult::inserted(self.store.persist_new(entity)?, timestamp),
            Some(before) => {
                let merged = self.store.merge_existing(entity)?;
                if merged.changed {
                    OptResult::updated(before, merged.entity, timestamp)
                } else {
                    OptResult::unchanged(Some(merged.entity), timestamp)
                }
            }
        };
        guard.release();
        Ok(result)
    }

    fn attempt_insert(&self, entity: &E) -> ModelResult<OptResult<E>> {
        let timestamp = self.clock.tick();
        let now = micros_to_timestamp(timestamp);

        if let Some(key) = entity.key() {
            if let Some(existing) = self.store.fetch_by_id(&key)? {
                tracing::debug!(key = %key, "Entity already present, skipping insert");
                return Ok(OptResult::unchanged(Some(existing), timestamp));
            }
        }

        let mut fresh = entity.clone();
        fresh.mark_created(now);
        fresh.mark_updated(now);

        let guard = self.uniqueness.acquire(self.store.as_ref(), None, &fresh)?;
        let saved = self.store.persist_new(fresh)?;
        guard.release();
        Ok(OptResult::inserted(saved, timestamp))
    }

    fn attempt_delete(&self, key: &E::Key) -> ModelResult<OptResult<E>> {
        let timestamp = self.clock.tick();
        let current = self
            .store
            .fetch_by_id(key)?
            .ok_or_else(|| self.not_found(key))?;
        self.store.delete(&current)?;
        Ok(OptResult::deleted(current, timestamp))
    }

    // ------------------------------------------------------------------------
    // Retry loop
    // ------------------------------------------------------------------------

    /// Run `attempt` until it commits, fails terminally, or the retry budget
    /// runs out.
    fn with_retries<F>(&self, key: &str, mut attempt: F) -> ModelResult<OptResult<E>>
    where
        F: FnMut() -> ModelResult<OptResult<E>>,
    {
        let ambient = self.store.in_transaction();
        if ambient && !self.config.allow_ambient_transaction {
            return Err(UpdateError::AmbientTransaction {
                kind: E::entity_kind(),
            }
            .into());
        }
        let max_iterations = if ambient { 1 } else { self.config.max_iterations };

        for iteration in 1..=max_iterations {
            self.check_canceled(key)?;

            let conflict = match attempt() {
                Err(ModelError::Store(err)) if err.is_retryable_conflict() => err,
                other => return other,
            };

            if ambient {
                tracing::debug!(
                    error = %conflict,
                    "Conflict inside ambient transaction, not retrying"
                );
                return Err(conflict.into());
            }
            if iteration == max_iterations {
                break;
            }

            let delay = self.backoff.next_delay();
            tracing::debug!(
                attempt = iteration,
                backoff_ms = delay.as_millis() as u64,
                error = %conflict,
                "Optimistic write conflicted, retrying"
            );
            if !self.backoff.sleep(delay, self.cancel.as_ref()) {
                return Err(self.interrupted(key));
            }
        }

        tracing::warn!(attempts = max_iterations, "Optimistic update retries exhausted");
        Err(UpdateError::OptimisticUpdateFailed {
            kind: E::entity_kind(),
            key: key.to_string(),
            attempts: max_iterations,
        }
        .into())
    }

    fn check_canceled(&self, key: &str) -> ModelResult<()> {
        match &self.cancel {
            Some(token) if token.is_canceled() => Err(self.interrupted(key)),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Post-commit
    // ------------------------------------------------------------------------

    /// Invalidate and notify after a committed change. Failures here are
    /// logged and swallowed: the write has already happened.
    fn after_commit(&self, result: &OptResult<E>) {
        let (Some(change), Some(key)) = (result.change_kind(), result.key()) else {
            return;
        };

        if let Err(e) = self.cache.invalidate(&key, change) {
            tracing::warn!(error = %e, key = %key, "Failed to invalidate cache after commit");
        }

        self.notifier.post(EntityChanged::new(
            change,
            result.before.clone(),
            result.after.clone(),
            result.timestamp,
        ));
    }

    fn not_found(&self, key: &E::Key) -> ModelError {
        UpdateError::EntityNotFound {
            kind: E::entity_kind(),
            key: key.to_string(),
        }
        .into()
    }

    fn interrupted(&self, key: &str) -> ModelError {
        tracing::debug!(key = %key, "Optimistic update interrupted");
        UpdateError::Interrupted {
            kind: E::entity_kind(),
            key: key.to_string(),
        }
        .into()
    }
}

// ============================================================================
// TESTS
// ============================================================================
