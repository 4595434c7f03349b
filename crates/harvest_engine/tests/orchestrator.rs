mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use harvest_core::{ConfigError, DateRange, FetchError, HarvestConfig, SourceRole, WorkItem};
use harvest_engine::{FetchAdapter, HarvestError, Harvester, SourceSet};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use support::{day, item, items, max_calls_in_window, payload, script, scripted, CallLog, MemoryStore, Step};

fn config(workers: usize, budget: u32) -> HarvestConfig {
    HarvestConfig {
        range: DateRange::single(day()),
        workers,
        requests_per_window: budget,
        window_ms: 1_000,
        refill_interval_ms: 100,
        batch_size: 4,
        flush_interval_ms: 2_000,
        primary_timeout_ms: 3_000,
        retry_timeout_ms: 1_000,
        secondary_timeout_ms: 3_000,
        progress_interval_ms: 500,
        ..HarvestConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn ten_items_with_fallback_for_the_last_three() {
    support::init_logging();
    let log = CallLog::new();
    let store = MemoryStore::with_targets(items(10));
    let sources = SourceSet::new(scripted(
        "primary",
        script(|item, _| {
            if item.sequence <= 7 {
                Step::delayed(Duration::from_millis(120), Step::Payload(payload(1.0)))
            } else {
                Step::delayed(Duration::from_millis(120), Step::Empty)
            }
        }),
        log.clone(),
    ))
    .with_secondary(scripted(
        "secondary",
        script(|item, _| Step::Payload(payload(f64::from(item.sequence) * 10.0))),
        log.clone(),
    ));

    let summary = Harvester::new(config(3, 5), sources, Box::new(store.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();

    let stats = summary.stats;
    assert_eq!(stats.succeeded_primary, 7);
    assert_eq!(stats.succeeded_fallback, 3);
    assert_eq!(stats.empty, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.terminal(), 10);
    assert_eq!(stats.persisted, 10);
    assert_eq!(summary.submitted, 10);
    assert!(!summary.cancelled);
    assert!(summary.failures.is_empty());

    let upserts = store.upserts();
    assert_eq!(upserts.len(), 10);
    for n in 8..=10 {
        let stored = store.stored(&item(n).identity()).unwrap();
        assert_eq!(stored.source, SourceRole::Secondary);
        assert_eq!(stored.payload, payload(f64::from(n) * 10.0));
    }

    assert!(log.max_in_flight() <= 3);
    assert!(max_calls_in_window(&log.calls_to("primary"), Duration::from_secs(1)) <= 5);
}

#[tokio::test(start_paused = true)]
async fn only_outstanding_items_in_range_are_harvested() {
    let log = CallLog::new();
    let other_day = NaiveDate::from_ymd_opt(2024, 4, 13).unwrap();
    let mut targets = items(3);
    targets.push(WorkItem::new("harbor-city", other_day, 1, harvest_core::MissingKind::All));
    let store = MemoryStore::with_targets(targets);

    let sources = SourceSet::new(scripted("primary", script(|_, _| Step::Payload(payload(1.0))), log.clone()));
    let first = Harvester::new(config(2, 10), sources.clone(), Box::new(store.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.submitted, 3);

    // Everything in range is stored now; a second run has nothing left to do.
    let second = Harvester::new(config(2, 10), sources, Box::new(store.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.submitted, 0);
    assert_eq!(second.stats.attempted, 0);
    assert_eq!(store.upserts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn partial_failures_still_complete_with_a_failure_sample() {
    let log = CallLog::new();
    let store = MemoryStore::with_targets(items(6));
    let sources = SourceSet::new(scripted(
        "primary",
        script(|item, _| {
            if item.sequence % 2 == 0 {
                Step::Fail(FetchError::new(harvest_core::FailureKind::HttpStatus(502), "bad gateway"))
            } else {
                Step::Payload(payload(1.0))
            }
        }),
        log,
    ));

    let summary = Harvester::new(config(2, 10), sources, Box::new(store.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stats.succeeded_primary, 3);
    assert_eq!(summary.stats.failed, 3);
    let mut failed: Vec<String> = summary.failures.iter().map(|f| f.identity.clone()).collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![item(2).identity(), item(4).identity(), item(6).identity()]
    );
    assert!(summary.format().contains("failed: "));
    assert_eq!(store.upserts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_before_any_work() {
    let log = CallLog::new();
    let store = MemoryStore::with_targets(items(2));
    let sources = SourceSet::new(scripted("primary", script(|_, _| Step::Empty), log.clone()));

    let result = Harvester::new(config(0, 5), sources, Box::new(store.clone()))
        .run(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(HarvestError::Config(ConfigError::ZeroWorkers))));
    assert!(log.built().is_empty());
    assert!(log.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn adapter_construction_failure_aborts_before_fetching() {
    let log = CallLog::new();
    let store = MemoryStore::with_targets(items(4));
    let broken = Arc::new(|worker_id: usize| -> Result<Box<dyn FetchAdapter>, FetchError> {
        Err(FetchError::fatal(format!("worker {worker_id}: secondary unreachable")))
    });
    let sources = SourceSet::new(scripted("primary", script(|_, _| Step::Payload(payload(1.0))), log.clone()))
        .with_secondary(broken);

    let result = Harvester::new(config(2, 5), sources, Box::new(store.clone()))
        .run(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(HarvestError::Adapter(_))));
    assert!(log.calls().is_empty());
    assert!(store.upserts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_preserves_already_fetched_results() {
    let log = CallLog::new();
    let store = MemoryStore::with_targets(items(20));
    let sources = SourceSet::new(scripted(
        "primary",
        script(|_, _| Step::delayed(Duration::from_millis(400), Step::Payload(payload(1.0)))),
        log.clone(),
    ));

    let cancel = CancellationToken::new();
    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            cancel.cancel();
        })
    };
    let summary = Harvester::new(config(2, 50), sources, Box::new(store.clone()))
        .run(cancel)
        .await
        .unwrap();
    trigger.await.unwrap();

    assert!(summary.cancelled);
    assert!(summary.not_started > 0);
    assert_eq!(summary.submitted, summary.stats.terminal() + summary.not_started);
    // Everything fetched before the interrupt was flushed, including the partial batch.
    assert_eq!(summary.stats.persisted, summary.stats.succeeded());
    assert_eq!(store.upserts().len() as u64, summary.stats.succeeded());
}

#[tokio::test(start_paused = true)]
async fn secondary_budget_is_independent_of_primary() {
    let log = CallLog::new();
    let store = MemoryStore::with_targets(items(8));
    let sources = SourceSet::new(scripted("primary", script(|_, _| Step::Empty), log.clone()))
        .with_secondary(scripted(
            "secondary",
            script(|_, _| Step::Payload(payload(2.0))),
            log.clone(),
        ));
    let config = HarvestConfig {
        secondary_requests_per_window: Some(2),
        ..config(4, 8)
    };

    let summary = Harvester::new(config, sources, Box::new(store.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stats.succeeded_fallback, 8);
    let window = Duration::from_secs(1);
    assert!(max_calls_in_window(&log.calls_to("secondary"), window) <= 2);
    assert!(max_calls_in_window(&log.calls_to("primary"), window) <= 8);
}
