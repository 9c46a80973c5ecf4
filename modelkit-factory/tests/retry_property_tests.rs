//! Property tests for the retry loop under injected write conflicts.

use std::sync::Arc;
use std::time::Duration;

use modelkit_core::{ModelError, UpdateError};
use modelkit_factory::{FactoryConfig, ModelFactory};
use modelkit_storage::{InMemoryCacheBackend, InMemoryStore};
use modelkit_test_utils::fixtures::account;
use modelkit_test_utils::generators::{arb_account, arb_deltas};
use modelkit_test_utils::{Account, FlakyStore};
use proptest::prelude::*;

type Flaky = FlakyStore<InMemoryStore<Account>>;

fn flaky_factory(
    max_iterations: u32,
) -> (
    Arc<Flaky>,
    ModelFactory<Account, Flaky, InMemoryCacheBackend<i64, Account>>,
) {
    let store = Arc::new(FlakyStore::new(Arc::new(InMemoryStore::new())));
    let factory = ModelFactory::new(store.clone(), Arc::new(InMemoryCacheBackend::new()))
        .with_config(FactoryConfig {
            max_iterations,
            max_backoff: Duration::ZERO,
            allow_ambient_transaction: false,
        });
    (store, factory)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Fewer conflicts than attempts always commits, exactly once.
    #[test]
    fn prop_conflicts_below_budget_commit(conflicts in 0u32..8, extra in 1u32..4) {
        let (store, factory) = flaky_factory(conflicts + extra);
        factory.update_or_create(&1, |_| account("ann", 0), |_| {}).unwrap();

        store.fail_merges(conflicts);
        let mut calls = 0u32;
        let result = factory
            .update(&1, |a| {
                calls += 1;
                a.balance += 5;
            })
            .unwrap();

        prop_assert!(result.is_updated);
        prop_assert_eq!(calls, conflicts + 1);
        prop_assert_eq!(store.inner().row(&1).map(|a| a.balance), Some(5));
        prop_assert_eq!(store.injected(), conflicts);
    }

    /// Conflicts on every attempt exhaust the budget without writing.
    #[test]
    fn prop_exhausted_budget_fails(max_iterations in 1u32..8) {
        let (store, factory) = flaky_factory(max_iterations);
        factory.update_or_create(&1, |_| account("ann", 0), |_| {}).unwrap();

        store.fail_merges(max_iterations);
        let err = factory.update(&1, |a| a.balance += 5).unwrap_err();

        prop_assert_eq!(
            err,
            ModelError::Update(UpdateError::OptimisticUpdateFailed {
                kind: modelkit_test_utils::fixtures::ACCOUNT,
                key: "1".to_string(),
                attempts: max_iterations,
            })
        );
        prop_assert_eq!(store.inner().row(&1).map(|a| a.balance), Some(0));
    }

    /// Applying a sequence of deltas yields their sum, one version per write.
    #[test]
    fn prop_sequential_deltas_sum(deltas in arb_deltas()) {
        let (store, factory) = flaky_factory(3);
        factory.update_or_create(&1, |_| account("ann", 0), |_| {}).unwrap();
        let start_version = store.inner().row(&1).map(|a| a.version).unwrap_or_default();

        let mut writes = 0i64;
        for delta in &deltas {
            store.fail_merges(1);
            let result = factory.update(&1, |a| {
                a.balance += delta;
                *delta != 0
            }).unwrap();
            if result.is_updated {
                writes += 1;
            }
        }

        let row = store.inner().row(&1).unwrap();
        prop_assert_eq!(row.balance, deltas.iter().sum::<i64>());
        prop_assert_eq!(row.version, start_version + writes);
    }

    /// Whatever an insert commits is exactly what the next read returns.
    #[test]
    fn prop_opt_insert_then_get(account in arb_account(), conflicts in 0u32..3) {
        let (store, factory) = flaky_factory(conflicts + 1);
        store.fail_inserts(conflicts);

        let committed = factory.opt_insert(account.clone()).unwrap().into_after().unwrap();
        let key = committed.id.unwrap();
        prop_assert_eq!(factory.get(&key).unwrap(), Some(committed.clone()));
        prop_assert_eq!(committed.balance, account.balance);
        prop_assert_eq!(committed.owner, account.owner);
        prop_assert!(committed.created_at.is_some());
    }

    /// Primary-key races on insert are retried like version conflicts.
    #[test]
    fn prop_insert_races_retry(conflicts in 0u32..4) {
        let (store, factory) = flaky_factory(conflicts + 1);
        store.fail_inserts(conflicts);

        let result = factory.opt_insert(account("ann", 3)).unwrap();
        prop_assert!(result.is_inserted);
        prop_assert_eq!(store.inner().len(), 1);
    }
}
