//! Bounded set of workers draining the work list.
//!
//! Each worker owns a [`SourceResolver`] with private adapter instances built
//! before any work starts. Workers pull items from a shared list, so at most
//! `workers` resolutions are in flight at any moment.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use harvest_core::{BatchRecord, FetchError, FetchOutcome, HarvestStats, SourceRole, WorkItem};
use harvest_logging::{harvest_debug, harvest_error, harvest_info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{RateLimiter, ResolvePolicy, SourceResolver, SourceSet, WriterInput};

/// Rate budgets handed to every worker's resolver.
#[derive(Debug, Clone)]
pub struct PoolLimiters {
    pub primary: RateLimiter,
    pub secondary: Option<RateLimiter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    pub submitted: u64,
    /// Items that reached a terminal outcome.
    pub resolved: u64,
    /// Items left in the list because the run was cancelled.
    pub not_started: u64,
    pub forwarded: u64,
    pub worker_panics: u64,
}

#[derive(Debug, Default)]
struct WorkerTally {
    resolved: u64,
    forwarded: u64,
}

pub struct WorkerPool {
    resolvers: Vec<SourceResolver>,
    stats: Arc<HarvestStats>,
}

impl WorkerPool {
    /// Builds `workers` resolvers, each with freshly constructed adapters.
    /// Any factory failure aborts construction.
    pub fn build(
        sources: &SourceSet,
        workers: usize,
        limiters: PoolLimiters,
        policy: ResolvePolicy,
        stats: Arc<HarvestStats>,
    ) -> Result<Self, FetchError> {
        let workers = workers.max(1);
        let mut resolvers = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let primary = sources.primary.build(worker_id)?;
            let mut resolver =
                SourceResolver::new(primary, limiters.primary.clone(), policy, stats.clone());
            if let Some(factory) = &sources.secondary {
                let secondary = factory.build(worker_id)?;
                resolver = resolver.with_secondary(secondary, limiters.secondary.clone());
            }
            resolvers.push(resolver);
        }
        Ok(Self { resolvers, stats })
    }

    pub fn workers(&self) -> usize {
        self.resolvers.len()
    }

    /// Resolves every item exactly once and forwards successes to `results`.
    /// Returns once every pulled item is terminal. Cancelling `shutdown` stops
    /// intake; in-flight items still finish.
    pub async fn run(
        self,
        items: Vec<WorkItem>,
        results: mpsc::Sender<WriterInput>,
        shutdown: CancellationToken,
    ) -> PoolReport {
        let submitted = items.len() as u64;
        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        harvest_info!(
            "worker pool starting: {} item(s), {} worker(s)",
            submitted,
            self.resolvers.len()
        );

        let handles: Vec<_> = self
            .resolvers
            .into_iter()
            .enumerate()
            .map(|(worker_id, resolver)| {
                tokio::spawn(run_worker(
                    worker_id,
                    resolver,
                    queue.clone(),
                    results.clone(),
                    shutdown.clone(),
                    self.stats.clone(),
                ))
            })
            .collect();
        drop(results);

        let mut report = PoolReport {
            submitted,
            ..PoolReport::default()
        };
        for (worker_id, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(tally) => {
                    report.resolved += tally.resolved;
                    report.forwarded += tally.forwarded;
                }
                Err(err) => {
                    harvest_error!("worker {} terminated abnormally: {}", worker_id, err);
                    report.worker_panics += 1;
                }
            }
        }
        report.not_started = match queue.lock() {
            Ok(guard) => guard.len() as u64,
            Err(poisoned) => poisoned.into_inner().len() as u64,
        };
        harvest_info!(
            "worker pool finished: {} resolved, {} forwarded, {} not started",
            report.resolved,
            report.forwarded,
            report.not_started
        );
        report
    }
}

async fn run_worker(
    worker_id: usize,
    mut resolver: SourceResolver,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    results: mpsc::Sender<WriterInput>,
    shutdown: CancellationToken,
    stats: Arc<HarvestStats>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    loop {
        if shutdown.is_cancelled() {
            harvest_debug!("worker {} stopping: shutdown requested", worker_id);
            break;
        }
        let next = match queue.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        let Some(item) = next else {
            break;
        };

        let resolution = resolver.resolve(&item).await;
        tally.resolved += 1;

        if let FetchOutcome::Success(payload) = resolution.outcome {
            let source = resolution.source.unwrap_or(SourceRole::Primary);
            let identity = item.identity();
            let record = BatchRecord::new(item, payload, source);
            if results.send(WriterInput::Record(record)).await.is_err() {
                harvest_error!("{} dropped: result queue closed", identity);
                stats.record_dropped(&identity, "result queue closed");
            } else {
                tally.forwarded += 1;
            }
        }
    }
    tally
}
