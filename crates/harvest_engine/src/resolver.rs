//! Fallback chain for a single work item.
//!
//! Primary first, under the shared rate budget. One retry with a shorter
//! timeout when the primary times out. The secondary is consulted when the
//! primary has no usable data or timed out twice, under its own budget if one
//! is configured.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use harvest_core::{
    FailureKind, FetchError, FetchOutcome, HarvestConfig, HarvestStats, RecordPayload,
    SourceRole, WorkItem,
};
use harvest_logging::{harvest_debug, harvest_warn};

use crate::{AdapterResponse, FetchAdapter, RateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub primary_timeout: Duration,
    pub retry_timeout: Duration,
    pub secondary_timeout: Duration,
}

impl From<&HarvestConfig> for ResolvePolicy {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            primary_timeout: config.primary_timeout(),
            retry_timeout: config.retry_timeout(),
            secondary_timeout: config.secondary_timeout(),
        }
    }
}

/// Terminal outcome plus the source that produced a success.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: FetchOutcome,
    pub source: Option<SourceRole>,
}

impl Resolution {
    fn success(payload: RecordPayload, source: SourceRole) -> Self {
        Self {
            outcome: FetchOutcome::Success(payload),
            source: Some(source),
        }
    }

    fn without_data(outcome: FetchOutcome) -> Self {
        Self {
            outcome,
            source: None,
        }
    }
}

enum Attempt {
    Data(RecordPayload),
    Empty,
    Failed(FetchError),
}

/// What the primary left behind when it produced no data.
enum PrimaryMiss {
    Empty,
    TimedOut(FetchError),
}

/// Per-worker resolver. Owns its adapters; shares only the limiters and stats.
pub struct SourceResolver {
    primary: Box<dyn FetchAdapter>,
    secondary: Option<Box<dyn FetchAdapter>>,
    primary_limiter: RateLimiter,
    secondary_limiter: Option<RateLimiter>,
    policy: ResolvePolicy,
    stats: Arc<HarvestStats>,
}

impl SourceResolver {
    pub fn new(
        primary: Box<dyn FetchAdapter>,
        primary_limiter: RateLimiter,
        policy: ResolvePolicy,
        stats: Arc<HarvestStats>,
    ) -> Self {
        Self {
            primary,
            secondary: None,
            primary_limiter,
            secondary_limiter: None,
            policy,
            stats,
        }
    }

    /// Adds a fallback source. `limiter` is its independent budget; `None` exempts it.
    pub fn with_secondary(
        mut self,
        secondary: Box<dyn FetchAdapter>,
        limiter: Option<RateLimiter>,
    ) -> Self {
        self.secondary = Some(secondary);
        self.secondary_limiter = limiter;
        self
    }

    /// Resolves `item` to exactly one terminal outcome and records it in the stats.
    pub async fn resolve(&mut self, item: &WorkItem) -> Resolution {
        self.stats.record_attempt();

        let first = attempt(
            self.primary.as_mut(),
            Some(&self.primary_limiter),
            item,
            self.policy.primary_timeout,
        )
        .await;

        let primary = match first {
            Attempt::Failed(err) if err.kind.is_timeout() => {
                harvest_debug!("{}: primary timed out, retrying once: {}", item, err);
                self.stats.record_retry();
                attempt(
                    self.primary.as_mut(),
                    Some(&self.primary_limiter),
                    item,
                    self.policy.retry_timeout,
                )
                .await
            }
            other => other,
        };

        let miss = match primary {
            Attempt::Data(payload) => {
                self.stats.record_primary_success();
                return Resolution::success(payload, SourceRole::Primary);
            }
            Attempt::Empty => PrimaryMiss::Empty,
            Attempt::Failed(err) if err.kind.is_timeout() => PrimaryMiss::TimedOut(err),
            Attempt::Failed(err) => return self.fail(item, FetchOutcome::from_error(err)),
        };

        let Some(secondary) = self.secondary.as_mut() else {
            return self.settle_miss(item, miss);
        };

        self.stats.record_fallback_attempt();
        let fallback = attempt(
            secondary.as_mut(),
            self.secondary_limiter.as_ref(),
            item,
            self.policy.secondary_timeout,
        )
        .await;

        match fallback {
            Attempt::Data(payload) => {
                self.stats.record_fallback_success();
                Resolution::success(payload, SourceRole::Secondary)
            }
            Attempt::Empty => self.settle_miss(item, miss),
            Attempt::Failed(err) => self.fail(item, FetchOutcome::from_error(err)),
        }
    }

    /// Nothing usable anywhere: `Empty` only if every consulted source said so.
    fn settle_miss(&self, item: &WorkItem, miss: PrimaryMiss) -> Resolution {
        match miss {
            PrimaryMiss::Empty => {
                self.stats.record_empty();
                Resolution::without_data(FetchOutcome::Empty)
            }
            PrimaryMiss::TimedOut(err) => self.fail(item, FetchOutcome::Transient(err)),
        }
    }

    fn fail(&self, item: &WorkItem, outcome: FetchOutcome) -> Resolution {
        let reason = match &outcome {
            FetchOutcome::Transient(err) | FetchOutcome::Fatal(err) => err.to_string(),
            other => other.label().to_string(),
        };
        harvest_warn!("{} failed ({}): {}", item, outcome.label(), reason);
        self.stats.record_failure(&item.identity(), &reason);
        Resolution::without_data(outcome)
    }
}

async fn attempt(
    adapter: &mut dyn FetchAdapter,
    limiter: Option<&RateLimiter>,
    item: &WorkItem,
    timeout: Duration,
) -> Attempt {
    if let Some(limiter) = limiter {
        if let Err(err) = limiter.acquire().await {
            return Attempt::Failed(FetchError::new(FailureKind::LimiterClosed, err.to_string()));
        }
    }

    let source = adapter.name().to_string();
    let call = AssertUnwindSafe(adapter.fetch(item, timeout)).catch_unwind();
    let response = match tokio::time::timeout(timeout, call).await {
        Err(_) => {
            return Attempt::Failed(FetchError::timeout(format!(
                "{source} exceeded {} ms",
                timeout.as_millis()
            )))
        }
        Ok(Err(panic)) => {
            return Attempt::Failed(FetchError::new(
                FailureKind::Other,
                format!("{source} panicked: {}", panic_message(panic.as_ref())),
            ))
        }
        Ok(Ok(response)) => response,
    };

    match response {
        Ok(AdapterResponse::Payload(payload)) if payload.is_complete_for(item.kind) => {
            Attempt::Data(payload)
        }
        Ok(AdapterResponse::Payload(_)) => {
            harvest_debug!("{}: {} returned an incomplete payload", item, source);
            Attempt::Empty
        }
        Ok(AdapterResponse::Empty) => Attempt::Empty,
        Err(err) => Attempt::Failed(err),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
