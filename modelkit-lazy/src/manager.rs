//! Pass-based loading driver.

use modelkit_core::{ModelConfig, ModelResult, DEFAULT_MAX_LOAD_ITERATIONS};
use tracing::debug;

use crate::loader::Loaders;
use crate::reach::Walkable;
use crate::registry::Registry;
use crate::walker::GraphWalker;

/// What one [`LazyLoadManager::load`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Passes that issued at least one batch.
    pub passes: usize,
    /// Distinct keys requested, summed over passes.
    pub requested: usize,
    /// Slots filled, summed over passes.
    pub loaded: usize,
    /// Whether loading stopped at the pass cap with work left.
    pub capped: bool,
}

/// Resolves pending relations of a graph in batched passes.
///
/// Each pass walks the graph, batches every pending key per target into one
/// loader call, then injects the results. Loading stops once a pass fills
/// nothing, or after the pass cap. The cap is the only thing that ends
/// loading of a cyclic graph.
#[derive(Debug, Clone)]
pub struct LazyLoadManager {
    loaders: Loaders,
    max_iterations: usize,
}

impl LazyLoadManager {
    pub fn new(loaders: Loaders) -> Self {
        Self {
            loaders,
            max_iterations: DEFAULT_MAX_LOAD_ITERATIONS,
        }
    }

    pub fn from_config(loaders: Loaders, config: &ModelConfig) -> ModelResult<Self> {
        config.validate()?;
        Ok(Self::new(loaders).with_max_iterations(config.max_load_iterations))
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn loaders(&self) -> &Loaders {
        &self.loaders
    }

    /// Load `root` with a fresh registry, the default walker and the
    /// configured pass cap.
    pub fn load_all(&self, root: &mut dyn Walkable) -> ModelResult<LoadReport> {
        self.load(
            self.max_iterations,
            root,
            &mut Registry::new(),
            &GraphWalker::new(),
        )
    }

    pub fn load(
        &self,
        max_iterations: usize,
        root: &mut dyn Walkable,
        registry: &mut Registry,
        walker: &GraphWalker,
    ) -> ModelResult<LoadReport> {
        let mut report = LoadReport::default();

        for pass in 0..max_iterations {
            walker.apply(root, registry);
            if registry.is_empty() {
                return Ok(report);
            }

            let resolved = registry.load(&self.loaders)?;
            let loaded = walker.inject(root, &resolved);
            debug!(
                pass = pass + 1,
                requested = registry.len(),
                returned = resolved.len(),
                loaded,
                "Lazy load pass complete"
            );

            report.passes += 1;
            report.requested += registry.len();
            report.loaded += loaded;
            if loaded == 0 {
                return Ok(report);
            }
        }

        walker.apply(root, registry);
        report.capped = !registry.is_empty();
        if report.capped {
            debug!(
                max_iterations,
                pending = registry.len(),
                "Lazy load stopped at pass cap"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_graph::{author, make_test_loaders, post, Feed, AUTHOR, POST};
    use modelkit_core::{LoadError, ModelError, RelationKey};
    use std::collections::BTreeSet;

    #[test]
    fn test_loads_until_nothing_pending() {
        let (loaders, log) = make_test_loaders(
            vec![author(1, None, &[10, 11])],
            vec![post(10, 1), post(11, 1)],
        );
        let manager = LazyLoadManager::new(loaders).with_max_iterations(2);
        let mut root = post(10, 1);

        let report = manager.load_all(&mut root).unwrap();
        assert_eq!(report.passes, 2);
        assert!(report.capped);

        let loaded_author = root.author.get().unwrap();
        assert!(loaded_author.posts.iter().all(|p| p.is_loaded()));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (AUTHOR, vec![RelationKey::Int(1)]),
                (POST, vec![RelationKey::Int(10), RelationKey::Int(11)]),
            ]
        );
    }

    #[test]
    fn test_self_referential_graph_terminates_at_cap() {
        let (loaders, log) = make_test_loaders(
            vec![author(1, Some(2), &[]), author(2, Some(1), &[])],
            vec![],
        );
        let manager = LazyLoadManager::new(loaders).with_max_iterations(5);
        let mut root = author(1, Some(2), &[]);

        let report = manager.load_all(&mut root).unwrap();
        assert_eq!(report.passes, 5);
        assert_eq!(report.loaded, 5);
        assert!(report.capped);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 5);
        for (_, keys) in log.iter() {
            let distinct: BTreeSet<_> = keys.iter().collect();
            assert_eq!(distinct.len(), keys.len());
        }
    }

    #[test]
    fn test_acyclic_graph_stops_early() {
        let (loaders, _log) = make_test_loaders(vec![author(1, None, &[])], vec![]);
        let manager = LazyLoadManager::new(loaders);
        let mut feed = Feed {
            posts: vec![post(10, 1), post(11, 1)],
        };

        let report = manager.load_all(&mut feed).unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.requested, 1);
        assert_eq!(report.loaded, 2);
        assert!(!report.capped);
    }

    #[test]
    fn test_dangling_ends_loading() {
        let (loaders, log) = make_test_loaders(vec![], vec![]);
        let manager = LazyLoadManager::new(loaders);
        let mut root = post(10, 404);

        let report = manager.load_all(&mut root).unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.loaded, 0);
        assert!(root.author.is_dangling());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_loader_fails() {
        let manager = LazyLoadManager::new(Loaders::new());
        let mut root = post(10, 1);

        let err = manager.load_all(&mut root).unwrap_err();
        assert_eq!(
            err,
            ModelError::Load(LoadError::MissingLoader {
                target: "author".to_string()
            })
        );
    }

    #[test]
    fn test_caller_supplied_walker_and_registry() {
        let (loaders, _log) = make_test_loaders(vec![author(2, None, &[])], vec![post(20, 2)]);
        let manager = LazyLoadManager::new(loaders);
        let mut root = author(1, Some(2), &[20]);
        let mut registry = Registry::new();

        let report = manager
            .load(3, &mut root, &mut registry, &GraphWalker::with_scenario("summary"))
            .unwrap();
        assert_eq!(report.passes, 1);
        assert!(root.mentor.is_loaded());
        assert!(root.posts[0].is_pending());
    }

    #[test]
    fn test_from_config_uses_load_cap() {
        let config = ModelConfig::default().with_max_load_iterations(3);
        let manager = LazyLoadManager::from_config(Loaders::new(), &config).unwrap();
        assert_eq!(manager.max_iterations(), 3);

        let invalid = ModelConfig::default().with_max_load_iterations(0);
        assert!(LazyLoadManager::from_config(Loaders::new(), &invalid).is_err());
    }
}
