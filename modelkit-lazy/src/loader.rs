//! Batch loaders and the values they resolve.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use modelkit_core::{Entity, EntityKey, LoadError, ModelResult, RelationKey};
use modelkit_storage::{CacheBackend, EntityStore, ReadThroughCache};
use tracing::warn;

use crate::schema::TargetType;

/// A loaded value of any entity family.
pub type LoadedValue = Arc<dyn Any + Send + Sync>;

/// Fetches many rows of one entity family in a single call.
///
/// Keys absent from the returned map are treated as dangling references.
pub trait BatchLoader: Send + Sync {
    fn target(&self) -> TargetType;

    fn load_batch(&self, keys: &[RelationKey]) -> ModelResult<HashMap<RelationKey, LoadedValue>>;
}

/// Loader registry, keyed by target.
#[derive(Clone, Default)]
pub struct Loaders {
    loaders: BTreeMap<TargetType, Arc<dyn BatchLoader>>,
}

impl std::fmt::Debug for Loaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loaders")
            .field("targets", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Loaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader`, replacing any loader for the same target.
    pub fn register(&mut self, loader: Arc<dyn BatchLoader>) {
        self.loaders.insert(loader.target(), loader);
    }

    pub fn with(mut self, loader: Arc<dyn BatchLoader>) -> Self {
        self.register(loader);
        self
    }

    pub fn get(&self, target: TargetType) -> Result<&Arc<dyn BatchLoader>, LoadError> {
        self.loaders
            .get(&target)
            .ok_or_else(|| LoadError::MissingLoader {
                target: target.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

// ============================================================================
// RESOLVED VALUES
// ============================================================================

/// Everything one pass asked for and what came back.
#[derive(Default)]
pub struct Resolved {
    values: BTreeMap<TargetType, HashMap<RelationKey, LoadedValue>>,
    requested: BTreeMap<TargetType, BTreeSet<RelationKey>>,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let returned: BTreeMap<_, _> = self
            .values
            .iter()
            .map(|(target, values)| (target, values.len()))
            .collect();
        f.debug_struct("Resolved")
            .field("requested", &self.requested)
            .field("returned", &returned)
            .finish()
    }
}

impl Resolved {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        target: TargetType,
        requested: BTreeSet<RelationKey>,
        values: HashMap<RelationKey, LoadedValue>,
    ) {
        self.requested.entry(target).or_default().extend(requested);
        self.values.entry(target).or_default().extend(values);
    }

    pub fn get(&self, target: TargetType, key: &RelationKey) -> Option<&LoadedValue> {
        self.values.get(&target).and_then(|values| values.get(key))
    }

    pub fn was_requested(&self, target: TargetType, key: &RelationKey) -> bool {
        self.requested
            .get(&target)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Number of values returned across all targets.
    pub fn len(&self) -> usize {
        self.values.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// LOADERS
// ============================================================================

/// Loader backed by a closure.
pub struct FnLoader<F> {
    target: TargetType,
    load: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&[RelationKey]) -> ModelResult<HashMap<RelationKey, LoadedValue>> + Send + Sync,
{
    pub fn new(target: TargetType, load: F) -> Self {
        Self { target, load }
    }
}

impl<F> BatchLoader for FnLoader<F>
where
    F: Fn(&[RelationKey]) -> ModelResult<HashMap<RelationKey, LoadedValue>> + Send + Sync,
{
    fn target(&self) -> TargetType {
        self.target
    }

    fn load_batch(&self, keys: &[RelationKey]) -> ModelResult<HashMap<RelationKey, LoadedValue>> {
        (self.load)(keys)
    }
}

/// Loader that resolves relations through a [`ReadThroughCache`].
pub struct CacheLoader<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    cache: ReadThroughCache<E, S, B>,
}

impl<E, S, B> CacheLoader<E, S, B>
where
    E: Entity,
    S: EntityStore<E>,
    B: CacheBackend<E::Key, E>,
{
    pub fn new(cache: ReadThroughCache<E, S, B>) -> Self {
        Self { cache }
    }
}

impl<E, S, B> BatchLoader for CacheLoader<E, S, B>
where
    E: Entity,
    S: EntityStore<E> + 'static,
    B: CacheBackend<E::Key, E> + 'static,
{
    fn target(&self) -> TargetType {
        E::entity_kind()
    }

    fn load_batch(&self, keys: &[RelationKey]) -> ModelResult<HashMap<RelationKey, LoadedValue>> {
        let mut typed = BTreeSet::new();
        for key in keys {
            match E::Key::from_relation_key(key) {
                Some(typed_key) => {
                    typed.insert(typed_key);
                }
                None => warn!(
                    family = %E::entity_kind(),
                    key = %key,
                    "Relation key has the wrong type"
                ),
            }
        }

        let found = self
            .cache
            .get_all(&typed)
            .map_err(|e| LoadError::LoaderFailed {
                target: E::entity_kind().to_string(),
                reason: e.to_string(),
            })?;

        Ok(found
            .into_iter()
            .filter_map(|(key, value)| {
                value.map(|entity| (key.to_relation_key(), Arc::new(entity) as LoadedValue))
            })
            .collect())
    }
}
