use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Default number of failing identities retained for the final summary.
pub const DEFAULT_FAILURE_SAMPLE_CAP: usize = 20;

/// One failing item kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSample {
    pub identity: String,
    pub reason: String,
}

/// Run-wide counters shared by every worker and the writer.
///
/// Counters only grow and are updated with atomic increments; `snapshot` never
/// blocks a worker. The failure sample is capped and sits behind its own lock,
/// which only the failure paths touch.
#[derive(Debug)]
pub struct HarvestStats {
    attempted: AtomicU64,
    succeeded_primary: AtomicU64,
    succeeded_fallback: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    fallback_attempted: AtomicU64,
    persisted: AtomicU64,
    persist_failed: AtomicU64,
    dropped: AtomicU64,
    failure_cap: usize,
    failures: Mutex<Vec<FailureSample>>,
}

impl Default for HarvestStats {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_SAMPLE_CAP)
    }
}

impl HarvestStats {
    pub fn new(failure_cap: usize) -> Self {
        Self {
            attempted: AtomicU64::new(0),
            succeeded_primary: AtomicU64::new(0),
            succeeded_fallback: AtomicU64::new(0),
            empty: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            fallback_attempted: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            persist_failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failure_cap,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_success(&self) {
        self.succeeded_primary.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_success(&self) {
        self.succeeded_fallback.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, identity: &str, reason: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.push_sample(identity, reason);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_attempt(&self) {
        self.fallback_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, count: u64) {
        self.persisted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self, identity: &str, reason: &str) {
        self.persist_failed.fetch_add(1, Ordering::Relaxed);
        self.push_sample(identity, reason);
    }

    /// A success that never reached the writer.
    pub fn record_dropped(&self, identity: &str, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.push_sample(identity, reason);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded_primary: self.succeeded_primary.load(Ordering::Relaxed),
            succeeded_fallback: self.succeeded_fallback.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            fallback_attempted: self.fallback_attempted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failed: self.persist_failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn failure_sample(&self) -> Vec<FailureSample> {
        match self.failures.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push_sample(&self, identity: &str, reason: &str) {
        let mut guard = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() < self.failure_cap {
            guard.push(FailureSample {
                identity: identity.to_string(),
                reason: reason.to_string(),
            });
        }
    }
}

/// Point-in-time copy of [`HarvestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub attempted: u64,
    pub succeeded_primary: u64,
    pub succeeded_fallback: u64,
    pub empty: u64,
    pub failed: u64,
    pub retried: u64,
    pub fallback_attempted: u64,
    pub persisted: u64,
    pub persist_failed: u64,
    pub dropped: u64,
}

impl StatsSnapshot {
    pub fn succeeded(&self) -> u64 {
        self.succeeded_primary + self.succeeded_fallback
    }

    /// Items that reached a terminal outcome.
    pub fn terminal(&self) -> u64 {
        self.succeeded() + self.empty + self.failed
    }

    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.terminal() as f64 / secs
        } else {
            0.0
        }
    }

    /// Human-readable progress line for periodic logging.
    pub fn format_progress(&self, total: u64, elapsed: Duration) -> String {
        let mut parts = vec![format!("[PROGRESS] {}/{} items", self.terminal(), total)];
        if total > 0 {
            let pct = self.terminal() as f64 / total as f64 * 100.0;
            parts.push(format!("- {pct:.1}% complete"));
        }
        parts.push(format!(
            "(primary {}, fallback {}, empty {}, failed {})",
            self.succeeded_primary, self.succeeded_fallback, self.empty, self.failed
        ));
        let rate = self.throughput(elapsed);
        if rate > 0.0 {
            parts.push(format!("at {rate:.2} items/sec"));
            let remaining = total.saturating_sub(self.terminal());
            if remaining > 0 {
                let eta = Duration::from_secs_f64(remaining as f64 / rate);
                parts.push(format!("- ~{} remaining", format_duration(eta)));
            }
        }
        parts.join(" ")
    }

    pub fn format_summary(&self, elapsed: Duration) -> String {
        format!(
            "[SUMMARY] attempted {} | primary {} | fallback {} | empty {} | failed {} | \
             retried {} | persisted {} | persist failures {} | dropped {} | elapsed {} | {:.2} items/sec",
            self.attempted,
            self.succeeded_primary,
            self.succeeded_fallback,
            self.empty,
            self.failed,
            self.retried,
            self.persisted,
            self.persist_failed,
            self.dropped,
            format_duration(elapsed),
            self.throughput(elapsed)
        )
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
