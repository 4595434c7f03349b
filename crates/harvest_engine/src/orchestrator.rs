//! Wires the pipeline together and drives one harvest run.
//!
//! Start order: validate, enumerate, build workers, refill tickers, writer,
//! reporter, pool. Stop order: pool intake, writer drain, reporter, refill
//! tickers. The tickers stop last so in-flight `acquire` calls can still be
//! served while the pool winds down.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::{
    ConfigError, FailureSample, FetchError, HarvestConfig, HarvestStats, StatsSnapshot,
};
use harvest_logging::{harvest_error, harvest_info, harvest_warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    BatchSettings, BatchWriter, HarvestStore, PoolLimiters, ProgressReporter, RateLimiter,
    ResolvePolicy, SourceSet, StoreError, WorkerPool, WriterInput, WriterReport,
};

/// Failures that stop a run. Per-item problems never surface here.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not enumerate outstanding work: {0}")]
    Store(#[from] StoreError),
    #[error("could not build adapter: {0}")]
    Adapter(FetchError),
    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSummary {
    pub stats: StatsSnapshot,
    pub submitted: u64,
    pub not_started: u64,
    pub flushes: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub failures: Vec<FailureSample>,
}

impl HarvestSummary {
    pub fn format(&self) -> String {
        let mut out = self.stats.format_summary(self.elapsed);
        out.push_str(&format!(
            "\n[SUMMARY] submitted {} | not started {} | flushes {}{}",
            self.submitted,
            self.not_started,
            self.flushes,
            if self.cancelled { " | cancelled" } else { "" }
        ));
        for failure in &self.failures {
            out.push_str(&format!("\n  failed: {} ({})", failure.identity, failure.reason));
        }
        out
    }
}

pub struct Harvester {
    config: HarvestConfig,
    sources: SourceSet,
    store: Box<dyn HarvestStore>,
}

impl Harvester {
    pub fn new(config: HarvestConfig, sources: SourceSet, store: Box<dyn HarvestStore>) -> Self {
        Self {
            config,
            sources,
            store,
        }
    }

    /// Runs to completion or until `cancel` fires. Partial failures still return `Ok`.
    pub async fn run(self, cancel: CancellationToken) -> Result<HarvestSummary, HarvestError> {
        let Self {
            config,
            sources,
            mut store,
        } = self;
        config.validate()?;
        let started = Instant::now();

        let items = store.outstanding(&config.range).await?;
        let submitted = items.len() as u64;
        harvest_info!(
            "harvest starting: {} outstanding item(s) in {}",
            submitted,
            config.range
        );

        let stats = Arc::new(HarvestStats::new(config.failure_sample_cap));
        let limiters = PoolLimiters {
            primary: RateLimiter::new(config.requests_per_window, config.window()),
            secondary: config
                .secondary_requests_per_window
                .map(|budget| RateLimiter::new(budget, config.window())),
        };
        let pool = WorkerPool::build(
            &sources,
            config.workers,
            limiters.clone(),
            ResolvePolicy::from(&config),
            stats.clone(),
        )
        .map_err(HarvestError::Adapter)?;

        let ticker_shutdown = CancellationToken::new();
        let mut tickers = vec![limiters
            .primary
            .spawn_refill(config.refill_interval(), ticker_shutdown.clone())];
        if let Some(secondary) = &limiters.secondary {
            tickers.push(secondary.spawn_refill(config.refill_interval(), ticker_shutdown.clone()));
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let writer = BatchWriter::new(store, BatchSettings::from(&config), stats.clone()).spawn(rx);

        let reporter_shutdown = CancellationToken::new();
        let reporter = ProgressReporter::new(stats.clone(), submitted, config.progress_interval())
            .spawn(reporter_shutdown.clone());

        let pool_report = pool.run(items, tx.clone(), cancel.clone()).await;
        if pool_report.worker_panics > 0 {
            harvest_error!("{} worker(s) terminated abnormally", pool_report.worker_panics);
        }

        if tx.send(WriterInput::Drain).await.is_err() {
            harvest_error!("batch writer stopped before the drain signal");
        }
        drop(tx);
        let writer_result = writer.await;

        reporter_shutdown.cancel();
        let _ = reporter.await;
        ticker_shutdown.cancel();
        for ticker in tickers {
            let _ = ticker.await;
        }
        limiters.primary.close();
        if let Some(secondary) = &limiters.secondary {
            secondary.close();
        }

        let writer_report: WriterReport = writer_result.map_err(|err| HarvestError::Task {
            task: "batch writer",
            message: err.to_string(),
        })?;

        let summary = HarvestSummary {
            stats: stats.snapshot(),
            submitted,
            not_started: pool_report.not_started,
            flushes: writer_report.flush_count(),
            elapsed: started.elapsed(),
            cancelled: cancel.is_cancelled(),
            failures: stats.failure_sample(),
        };
        if summary.cancelled {
            harvest_warn!(
                "harvest cancelled: {} item(s) not started",
                summary.not_started
            );
        }
        harvest_info!("{}", summary.format());
        Ok(summary)
    }
}
