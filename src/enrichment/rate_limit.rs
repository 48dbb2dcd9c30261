//! Global request budget shared by every worker.
//!
//! The CTT lookup API allows a limited number of calls per minute. All workers
//! go through one [`RateLimiter`], which enforces two gates:
//!
//! - **Budget**: at most `max_calls` grants in any rolling `window`.
//! - **Per-worker delay**: a worker waits `min_delay` between its own calls.
//!
//! Both gates live in a single [`RateBudget`] behind one mutex, so the
//! check-and-increment is atomic. The lock is never held across an `.await`:
//! a caller that must wait computes how long, drops the lock, sleeps, and
//! tries again.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Identifies a worker in the dispatcher pool.
pub type WorkerId = usize;

/// Limits applied to outbound lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum calls inside any rolling window
    pub max_calls: u32,
    /// Window length
    pub window: Duration,
    /// Minimum spacing between two calls from the same worker
    pub min_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 30,
            window: Duration::from_secs(60),
            min_delay: Duration::from_secs(2),
        }
    }
}

/// Mutable limiter state. Only touched under [`RateLimiter`]'s lock.
#[derive(Debug, Default)]
struct RateBudget {
    /// Grant instants still inside the window, oldest first
    calls: VecDeque<Instant>,
    /// Last grant per worker
    last_call: HashMap<WorkerId, Instant>,
    /// Grants since the limiter was created
    total: u64,
}

impl RateBudget {
    /// Grant a call at `now`, or report how long the caller must wait.
    fn try_acquire(
        &mut self,
        worker: WorkerId,
        now: Instant,
        config: &RateLimitConfig,
    ) -> Result<(), Duration> {
        self.evict(now, config.window);

        let mut wait = Duration::ZERO;

        if let Some(last) = self.last_call.get(&worker) {
            let ready_at = *last + config.min_delay;
            wait = wait.max(ready_at.saturating_duration_since(now));
        }

        if self.calls.len() >= config.max_calls as usize
            && let Some(oldest) = self.calls.front()
        {
            let frees_at = *oldest + config.window;
            wait = wait.max(frees_at.saturating_duration_since(now));
        }

        if !wait.is_zero() {
            return Err(wait);
        }

        self.calls.push_back(now);
        self.last_call.insert(worker, now);
        self.total += 1;
        Ok(())
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.calls.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Shared rate limiter. Construct once per engine and share by reference.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<RateBudget>,
}

impl RateLimiter {
    pub fn new(mut config: RateLimitConfig) -> Self {
        // A zero budget would block forever
        config.max_calls = config.max_calls.max(1);
        Self {
            config,
            state: Mutex::new(RateBudget::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until `worker` may issue a call, then record it.
    ///
    /// Every successful return consumes one unit of budget.
    pub async fn acquire(&self, worker: WorkerId) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                match state.try_acquire(worker, Instant::now(), &self.config) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };

            tracing::trace!(worker, wait_ms = wait.as_millis() as u64, "Waiting for rate limiter");
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls granted since creation.
    pub fn total_calls(&self) -> u64 {
        self.state.lock().total
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
