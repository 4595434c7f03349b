use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::DEFAULT_FAILURE_SAMPLE_CAP;
use crate::DateRange;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("refill interval ({refill_ms} ms) must not exceed the rate window ({window_ms} ms)")]
    RefillLongerThanWindow { refill_ms: u64, window_ms: u64 },
    #[error("retry timeout ({retry_ms} ms) must not exceed the primary timeout ({primary_ms} ms)")]
    RetryLongerThanPrimary { retry_ms: u64, primary_ms: u64 },
    #[error("date range {0} is inverted")]
    InvertedRange(DateRange),
}

/// Run parameters. Every field has a default so a config file only needs to
/// name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Dates whose outstanding work is harvested (inclusive).
    pub range: DateRange,
    /// Concurrent workers; also the bound on in-flight fetch calls.
    pub workers: usize,
    /// Primary rate budget per window.
    pub requests_per_window: u32,
    pub window_ms: u64,
    /// How often the refill ticker returns expired tokens.
    pub refill_interval_ms: u64,
    /// Independent budget for the secondary source. `None` exempts it.
    pub secondary_requests_per_window: Option<u32>,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Capacity of the queue between workers and the writer.
    pub queue_capacity: usize,
    pub primary_timeout_ms: u64,
    /// Shortened timeout for the single retry after a primary timeout.
    pub retry_timeout_ms: u64,
    pub secondary_timeout_ms: u64,
    pub progress_interval_ms: u64,
    pub failure_sample_cap: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            range: DateRange::single(Utc::now().date_naive()),
            workers: 4,
            requests_per_window: 10,
            window_ms: 1_000,
            refill_interval_ms: 500,
            secondary_requests_per_window: None,
            batch_size: 50,
            flush_interval_ms: 5_000,
            queue_capacity: 256,
            primary_timeout_ms: 15_000,
            retry_timeout_ms: 5_000,
            secondary_timeout_ms: 30_000,
            progress_interval_ms: 10_000,
            failure_sample_cap: DEFAULT_FAILURE_SAMPLE_CAP,
        }
    }
}

impl HarvestConfig {
    /// Rejects combinations that cannot run. Called before any task starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        let non_zero: [(&'static str, u64); 10] = [
            ("requests_per_window", u64::from(self.requests_per_window)),
            ("window_ms", self.window_ms),
            ("refill_interval_ms", self.refill_interval_ms),
            ("batch_size", self.batch_size as u64),
            ("flush_interval_ms", self.flush_interval_ms),
            ("queue_capacity", self.queue_capacity as u64),
            ("primary_timeout_ms", self.primary_timeout_ms),
            ("retry_timeout_ms", self.retry_timeout_ms),
            ("secondary_timeout_ms", self.secondary_timeout_ms),
            ("progress_interval_ms", self.progress_interval_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroValue(name));
        }
        if self.secondary_requests_per_window == Some(0) {
            return Err(ConfigError::ZeroValue("secondary_requests_per_window"));
        }
        if self.refill_interval_ms > self.window_ms {
            return Err(ConfigError::RefillLongerThanWindow {
                refill_ms: self.refill_interval_ms,
                window_ms: self.window_ms,
            });
        }
        if self.retry_timeout_ms > self.primary_timeout_ms {
            return Err(ConfigError::RetryLongerThanPrimary {
                retry_ms: self.retry_timeout_ms,
                primary_ms: self.primary_timeout_ms,
            });
        }
        if !self.range.is_valid() {
            return Err(ConfigError::InvertedRange(self.range));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn secondary_timeout(&self) -> Duration {
        Duration::from_millis(self.secondary_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
