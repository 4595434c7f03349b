use std::sync::Arc;
use std::time::Duration;

use harvest_core::{HarvestStats, StatsSnapshot};
use harvest_logging::harvest_info;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodically logs a progress line from a stats snapshot.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    stats: Arc<HarvestStats>,
    total: u64,
    interval: Duration,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(stats: Arc<HarvestStats>, total: u64, interval: Duration) -> Self {
        Self {
            stats,
            total,
            interval,
            started: Instant::now(),
        }
    }

    /// The progress line for the current moment.
    pub fn line(&self) -> String {
        self.stats
            .snapshot()
            .format_progress(self.total, self.started.elapsed())
    }

    /// Logs until `shutdown` is cancelled. Skips ticks where nothing changed.
    /// The task resolves to the number of lines it logged.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut last: Option<StatsSnapshot> = None;
            let mut logged = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = self.stats.snapshot();
                        if last != Some(snapshot) {
                            harvest_info!("{}", self.line());
                            last = Some(snapshot);
                            logged += 1;
                        }
                    }
                }
            }
            logged
        })
    }
}
