//! Rate-limited, retrying wrapper around a [`PostalCodeApi`].
//!
//! Every attempt (first try or retry) passes through the shared
//! [`RateLimiter`] before touching the network, so retries spend budget like
//! any other call. Transient failures back off exponentially with down-jitter
//! between attempts.

use std::sync::Arc;
use std::time::Duration;

use super::domain::{CanonicalCode, EnrichmentError, Location, Outcome};
use super::rate_limit::{RateLimiter, WorkerId};
use super::shutdown::Shutdown;
use super::traits::PostalCodeApi;

/// Retry configuration for transient lookup failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per code, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
    /// Down-jitter factor (0.25 = up to 25% shorter).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

/// Backoff before retry number `retry` (0 = before the second attempt).
pub fn backoff_delay(retry: u32, policy: &RetryPolicy) -> Duration {
    let base = policy.initial_backoff.as_secs_f64() * 2.0_f64.powi(retry.min(31) as i32);
    let capped = base.min(policy.max_backoff.as_secs_f64());

    let jitter = 1.0 - rand::random::<f64>() * policy.jitter_factor.clamp(0.0, 1.0);
    Duration::from_secs_f64(capped * jitter)
}

/// Map a final lookup result to an [`Outcome`].
///
/// Conclusive rejections become `Invalid`; exhausted retries and
/// cancellation become `Unknown`.
pub fn to_outcome(result: Result<Location, EnrichmentError>) -> Outcome {
    match result {
        Ok(location) => Outcome::Resolved(location),
        Err(EnrichmentError::ClientRejected { .. } | EnrichmentError::NoMatches) => {
            Outcome::not_found()
        }
        Err(_) => Outcome::Unknown,
    }
}

/// Lookup client shared by all dispatcher workers.
pub struct RateLimitedClient<A> {
    api: A,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl<A: PostalCodeApi> RateLimitedClient<A> {
    pub fn new(api: A, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            api,
            limiter,
            policy,
        }
    }

    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Resolve one code, keeping the error that ended the attempts.
    ///
    /// Returns [`EnrichmentError::Exhausted`] when every attempt failed
    /// transiently and [`EnrichmentError::Cancelled`] when `shutdown` fired
    /// during a wait or an in-flight request.
    pub async fn try_resolve(
        &self,
        code: &CanonicalCode,
        worker: WorkerId,
        shutdown: &Shutdown,
    ) -> Result<Location, EnrichmentError> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = backoff_delay(attempt - 2, &self.policy);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Err(EnrichmentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(EnrichmentError::Cancelled),
                _ = self.limiter.acquire(worker) => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(EnrichmentError::Cancelled),
                result = self.api.lookup(code) => result,
            };

            match result {
                Ok(location) => {
                    tracing::info!(
                        code = %code,
                        worker,
                        attempt,
                        class = "success",
                        municipality = %location.municipality,
                        district = %location.district,
                        "Lookup succeeded"
                    );
                    return Ok(location);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(code = %code, worker, attempt, class = "client_error", error = %e, "Lookup rejected");
                    return Err(e);
                }
                Err(e @ EnrichmentError::Network(_)) => {
                    tracing::error!(code = %code, worker, attempt, max_attempts, class = "transport_failure", error = %e, "Lookup failed");
                }
                Err(e) => {
                    tracing::error!(code = %code, worker, attempt, max_attempts, class = "server_error", error = %e, "Lookup failed");
                }
            }
        }

        tracing::warn!(code = %code, attempts = max_attempts, "Giving up on postal code");
        Err(EnrichmentError::Exhausted {
            attempts: max_attempts,
        })
    }
}
