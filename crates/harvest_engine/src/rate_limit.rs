//! Token-bucket admission gate for outgoing fetch calls.
//!
//! The pool starts full at `requests_per_window` tokens. `acquire` consumes a
//! token; a background ticker hands back every token that was taken at least
//! one window ago. A token can therefore be reused no earlier than one window
//! after it was issued, so any rolling window of that length admits at most
//! `requests_per_window` calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use harvest_logging::harvest_debug;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limiter is closed")]
    Closed,
}

/// Shared handle; clones refer to the same token pool.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    semaphore: Semaphore,
    capacity: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        let capacity = requests_per_window.max(1) as usize;
        Self {
            inner: Arc::new(Inner {
                semaphore: Semaphore::new(capacity),
                capacity,
                window,
                issued: Mutex::new(VecDeque::with_capacity(capacity)),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Waits until a token is available. There is no timeout: waiting here is
    /// backpressure. Fails only once the limiter has been closed.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| RateLimitError::Closed)?;
        // The token stays out of the pool until `refill` returns it.
        permit.forget();
        self.issued().push_back(Instant::now());
        Ok(())
    }

    /// Returns tokens issued at least one window ago. Returns how many came back.
    pub fn refill(&self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        {
            let mut issued = self.issued();
            while let Some(at) = issued.front() {
                if now.duration_since(*at) < self.inner.window {
                    break;
                }
                issued.pop_front();
                expired += 1;
            }
        }
        let room = self
            .inner
            .capacity
            .saturating_sub(self.inner.semaphore.available_permits());
        let returned = expired.min(room);
        if returned > 0 {
            self.inner.semaphore.add_permits(returned);
        }
        returned
    }

    /// Runs `refill` every `interval` until `shutdown` is cancelled.
    pub fn spawn_refill(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the pool already starts full.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let returned = limiter.refill();
                        if returned > 0 {
                            harvest_debug!("rate limiter refilled {} token(s)", returned);
                        }
                    }
                }
            }
            harvest_debug!("rate limiter refill ticker stopped");
        })
    }

    /// Wakes every pending `acquire` with [`RateLimitError::Closed`].
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    fn issued(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        match self.inner.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
