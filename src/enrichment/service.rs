//! Enrichment service - dispatches a batch of raw tokens over a worker pool
//!
//! This is the high-level API for enriching postal codes:
//! 1. Normalize every token (malformed ones are reported, never fetched)
//! 2. Skip codes the store already has an outcome for
//! 3. Resolve the rest with a bounded pool of workers sharing one budget
//! 4. Commit each outcome before it is reported
//!
//! A panic or error while processing one code never aborts the batch.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::db::{CommitResult, OutcomeStore};
use crate::enrichment::{
    client::{RateLimitedClient, RetryPolicy, to_outcome},
    ctt::CttClient,
    domain::{CanonicalCode, EnrichmentError, Outcome},
    normalize::normalize,
    rate_limit::{RateLimitConfig, RateLimiter, WorkerId},
    shutdown::Shutdown,
    traits::PostalCodeApi,
};
use crate::error::{Error, Result};

/// Configuration for the enrichment service
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Shared call budget
    pub rate_limit: RateLimitConfig,
    /// Retry behavior for transient failures
    pub retry: RetryPolicy,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub resolved: usize,
    pub invalid: usize,
    pub unknown: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[(String, Outcome)]) -> Self {
        let mut summary = Self::default();
        for (_, outcome) in results {
            match outcome {
                Outcome::Resolved(_) => summary.resolved += 1,
                Outcome::Invalid { .. } => summary.invalid += 1,
                Outcome::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.resolved + self.invalid + self.unknown
    }
}

/// Service for enriching batches of postal codes
pub struct EnrichmentService<A> {
    client: Arc<RateLimitedClient<A>>,
    store: OutcomeStore,
    workers: usize,
}

impl EnrichmentService<CttClient> {
    /// Service backed by the real postal code API.
    pub fn with_ctt(
        api_key: &str,
        base_url: &str,
        timeout: Duration,
        store: OutcomeStore,
        config: EnrichmentConfig,
    ) -> Result<Self> {
        let api = CttClient::with_base_url(api_key, base_url, timeout)?;
        Ok(Self::new(api, store, config))
    }
}

impl<A: PostalCodeApi + 'static> EnrichmentService<A> {
    /// Create a new enrichment service with its own rate limiter
    pub fn new(api: A, store: OutcomeStore, config: EnrichmentConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Self {
            client: Arc::new(RateLimitedClient::new(api, limiter, config.retry)),
            store,
            workers: config.workers.max(1),
        }
    }

    pub fn client(&self) -> &RateLimitedClient<A> {
        &self.client
    }

    pub fn store(&self) -> &OutcomeStore {
        &self.store
    }

    /// Enrich a batch, running to completion.
    pub async fn enrich_batch(&self, tokens: Vec<String>) -> Result<Vec<(String, Outcome)>> {
        self.enrich_batch_until(tokens, &Shutdown::new()).await
    }

    /// Enrich a batch, stopping early once `shutdown` fires.
    ///
    /// Returns one `(token, outcome)` pair per input token, in input order.
    /// Codes that were still pending when the batch stopped come back as
    /// [`Outcome::Unknown`] and are not committed. The only batch-level
    /// error is an unreachable store, checked before any lookup.
    pub async fn enrich_batch_until(
        &self,
        tokens: Vec<String>,
        shutdown: &Shutdown,
    ) -> Result<Vec<(String, Outcome)>> {
        self.store.ping().await.map_err(Error::StoreUnavailable)?;

        let mut outcomes: Vec<Option<Outcome>> = vec![None; tokens.len()];

        // Group token positions by canonical code, keeping first-seen order
        let mut groups: Vec<(CanonicalCode, Vec<usize>)> = Vec::new();
        let mut group_of: HashMap<CanonicalCode, usize> = HashMap::new();
        for (index, token) in tokens.iter().enumerate() {
            match normalize(token) {
                Ok(code) => match group_of.get(&code) {
                    Some(&group) => groups[group].1.push(index),
                    None => {
                        group_of.insert(code.clone(), groups.len());
                        groups.push((code, vec![index]));
                    }
                },
                Err(e) => {
                    tracing::debug!(token = %token, error = %e, "Rejected malformed postal code");
                    outcomes[index] = Some(Outcome::bad_format());
                }
            }
        }

        let mut pending = Vec::new();
        for (code, indices) in &groups {
            match self.store.lookup(code).await {
                Ok(Some(stored)) => {
                    tracing::debug!(code = %code, outcome = stored.label(), "Using stored outcome");
                    for &index in indices {
                        outcomes[index] = Some(stored.clone());
                    }
                }
                Ok(None) => pending.push(code.clone()),
                Err(e) => {
                    tracing::warn!(code = %code, error = %e, "Store lookup failed, fetching instead");
                    pending.push(code.clone());
                }
            }
        }

        tracing::info!(
            tokens = tokens.len(),
            unique = groups.len(),
            to_fetch = pending.len(),
            workers = self.workers,
            budget = self.client.limiter().config().max_calls,
            "Starting enrichment batch"
        );

        let mut fetched = self.run_workers(pending, shutdown).await;

        for (code, indices) in groups {
            if indices.iter().all(|&i| outcomes[i].is_some()) {
                continue;
            }
            let outcome = fetched.remove(&code).unwrap_or(Outcome::Unknown);
            for index in indices {
                outcomes[index] = Some(outcome.clone());
            }
        }

        let results: Vec<(String, Outcome)> = tokens
            .into_iter()
            .zip(outcomes)
            .map(|(token, outcome)| (token, outcome.unwrap_or(Outcome::Unknown)))
            .collect();

        let summary = BatchSummary::from_results(&results);
        tracing::info!(
            resolved = summary.resolved,
            invalid = summary.invalid,
            unknown = summary.unknown,
            cancelled = shutdown.is_cancelled(),
            "Enrichment batch finished"
        );

        Ok(results)
    }

    /// Resolve `codes` with at most `self.workers` concurrent lookups.
    async fn run_workers(
        &self,
        codes: Vec<CanonicalCode>,
        shutdown: &Shutdown,
    ) -> HashMap<CanonicalCode, Outcome> {
        if codes.is_empty() {
            return HashMap::new();
        }

        let workers = self.workers.min(codes.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(codes)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let client = Arc::clone(&self.client);
            let store = self.store.clone();
            let shutdown = shutdown.clone();

            set.spawn(async move {
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().pop_front();
                    let Some(code) = next else {
                        break;
                    };

                    let outcome = process_code(&client, &store, &code, worker, &shutdown).await;
                    if tx.send((code, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Enrichment worker stopped unexpectedly");
            }
        }

        let mut results = HashMap::new();
        while let Some((code, outcome)) = rx.recv().await {
            results.insert(code, outcome);
        }
        results
    }
}

/// Resolve and commit one code. Never panics, never fails.
async fn process_code<A: PostalCodeApi>(
    client: &RateLimitedClient<A>,
    store: &OutcomeStore,
    code: &CanonicalCode,
    worker: WorkerId,
    shutdown: &Shutdown,
) -> Outcome {
    let attempt = AssertUnwindSafe(client.try_resolve(code, worker, shutdown))
        .catch_unwind()
        .await;

    let outcome = match attempt {
        Ok(Err(EnrichmentError::Cancelled)) => {
            tracing::info!(code = %code, worker, "Lookup cancelled, leaving code for a later run");
            return Outcome::Unknown;
        }
        Ok(result) => to_outcome(result),
        Err(_) => {
            tracing::error!(code = %code, worker, "Panic while resolving postal code");
            Outcome::Unknown
        }
    };

    match store.commit(code, &outcome).await {
        Ok(CommitResult::Conflict) => {
            // Someone else stored this code first; report what is on record
            if let Ok(Some(stored)) = store.lookup(code).await {
                return stored;
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(code = %code, outcome = outcome.label(), error = %e, "Failed to persist outcome");
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{UNRESOLVED_REASON, UnresolvedSink, get_all_postal_codes};
    use crate::enrichment::traits::mocks::{ScriptedApi, Step, timeout};
    use crate::test_utils::{temp_db, temp_store};

    fn fast_config(workers: usize) -> EnrichmentConfig {
        EnrichmentConfig {
            workers,
            rate_limit: RateLimitConfig {
                max_calls: 1000,
                window: Duration::from_secs(60),
                min_delay: Duration::ZERO,
            },
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                jitter_factor: 0.0,
            },
        }
    }

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolves_and_stores() {
        let (store, _dir) = temp_store().await;
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, fast_config(3));

        let results = service.enrich_batch(tokens(&["4000,100"])).await.unwrap();
        assert_eq!(
            results,
            vec![("4000,100".to_string(), Outcome::resolved("Porto", "Porto"))]
        );

        let rows = get_all_postal_codes(service.store().pool()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].codigo_postal, "4000-100");
    }

    #[tokio::test]
    async fn test_malformed_token_is_never_fetched() {
        let (store, _dir) = temp_store().await;
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, fast_config(3));

        let results = service.enrich_batch(tokens(&["abc", ""])).await.unwrap();
        assert!(results.iter().all(|(_, o)| *o == Outcome::bad_format()));
        assert_eq!(service.client().limiter().total_calls(), 0);
        assert!(get_all_postal_codes(service.store().pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_recorded() {
        let (store, _dir) = temp_store().await;
        let api = ScriptedApi::always(Err(EnrichmentError::ClientRejected { status: 404 }));
        let service = EnrichmentService::new(api, store, fast_config(3));

        let results = service.enrich_batch(tokens(&["1000-001"])).await.unwrap();
        assert_eq!(results[0].1, Outcome::not_found());

        let code = normalize("1000-001").unwrap();
        assert_eq!(service.store().lookup(&code).await.unwrap(), Some(Outcome::not_found()));
        assert_eq!(service.store().sink().entries().unwrap()[0].code, "1000-001");
    }

    #[tokio::test]
    async fn test_exhausted_retries_stay_unknown() {
        let (store, _dir) = temp_store().await;
        let service = EnrichmentService::new(ScriptedApi::always(timeout()), store, fast_config(3));

        let results = service.enrich_batch(tokens(&["1000-001"])).await.unwrap();
        assert_eq!(results[0].1, Outcome::Unknown);
        assert_eq!(service.client().limiter().total_calls(), 3);

        let code = normalize("1000-001").unwrap();
        assert_eq!(service.store().lookup(&code).await.unwrap(), None);
        let entries = service.store().sink().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, UNRESOLVED_REASON);
    }

    #[tokio::test]
    async fn test_second_run_uses_stored_outcomes() {
        let (store, _dir) = temp_store().await;
        let api = ScriptedApi::resolving("Porto", "Porto").script(
            "1000-001",
            [Step::Respond(Err(EnrichmentError::ClientRejected { status: 404 }))],
        );
        let service = EnrichmentService::new(api, store, fast_config(2));
        let batch = tokens(&["4000100", "1000-001"]);

        let first = service.enrich_batch(batch.clone()).await.unwrap();
        let calls = service.client().limiter().total_calls();
        assert_eq!(calls, 2);

        let second = service.enrich_batch(batch).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.client().limiter().total_calls(), calls);
    }

    #[tokio::test]
    async fn test_duplicate_tokens_fetch_once() {
        let (store, _dir) = temp_store().await;
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, fast_config(3));

        let results = service
            .enrich_batch(tokens(&["4000-100", "4000100", " 4000,100"]))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, o)| *o == Outcome::resolved("Porto", "Porto")));
        assert_eq!(service.client().limiter().total_calls(), 1);
        assert_eq!(get_all_postal_codes(service.store().pool()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let (store, _dir) = temp_store().await;
        let api = ScriptedApi::resolving("Lisboa", "Lisboa")
            .script(
                "1000-001",
                [Step::Delay(
                    Duration::from_millis(50),
                    Ok(crate::enrichment::traits::mocks::location("Lisboa", "Lisboa")),
                )],
            )
            .script("9999-999", [Step::Respond(Err(EnrichmentError::NoMatches))]);
        let service = EnrichmentService::new(api, store, fast_config(3));

        let input = tokens(&["1000001", "bad", "9999999", "2000-002"]);
        let results = service.enrich_batch(input.clone()).await.unwrap();

        let returned: Vec<_> = results.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(returned, input);
        assert_eq!(results[0].1, Outcome::resolved("Lisboa", "Lisboa"));
        assert_eq!(results[1].1, Outcome::bad_format());
        assert_eq!(results[2].1, Outcome::not_found());
        assert_eq!(results[3].1, Outcome::resolved("Lisboa", "Lisboa"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (store, _dir) = temp_store().await;
        let api = ScriptedApi::resolving("Porto", "Porto").script("1000-001", [Step::Panic]);
        let service = EnrichmentService::new(api, store, fast_config(1));

        let results = service
            .enrich_batch(tokens(&["1000-001", "4000-100"]))
            .await
            .unwrap();

        assert_eq!(results[0].1, Outcome::Unknown);
        assert_eq!(results[1].1, Outcome::resolved("Porto", "Porto"));

        let code = normalize("1000-001").unwrap();
        assert_eq!(service.store().lookup(&code).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let (store, _dir) = temp_store().await;
        let api = ScriptedApi::resolving("Porto", "Porto").with_latency(Duration::from_millis(20));
        let service = EnrichmentService::new(api, store, fast_config(3));

        let batch: Vec<String> = (0..12).map(|i| format!("40{:02}-100", i)).collect();
        let results = service.enrich_batch(batch).await.unwrap();

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|(_, o)| matches!(o, Outcome::Resolved(_))));
        assert_eq!(service.client().api().call_count(), 12);
        assert!(service.client().api().max_in_flight() <= 3);
        assert_eq!(get_all_postal_codes(service.store().pool()).await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_batch_stays_within_budget() {
        let (store, _dir) = temp_store().await;
        let window = Duration::from_millis(200);
        let config = EnrichmentConfig {
            rate_limit: RateLimitConfig {
                max_calls: 4,
                window,
                min_delay: Duration::ZERO,
            },
            ..fast_config(3)
        };
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, config);

        let batch: Vec<String> = (0..10).map(|i| format!("30{:02}-000", i)).collect();
        service.enrich_batch(batch).await.unwrap();

        let mut times = service.client().api().call_times();
        times.sort();
        assert_eq!(times.len(), 10);
        // Any 5 consecutive calls span at least one window (minus scheduling slack)
        for pair in times.windows(5) {
            assert!(pair[4] - pair[0] >= window - Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_commits_nothing() {
        let (store, _dir) = temp_store().await;
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, fast_config(3));
        let shutdown = Shutdown::new();
        shutdown.cancel();

        let results = service
            .enrich_batch_until(tokens(&["4000-100", "xyz"]), &shutdown)
            .await
            .unwrap();

        assert_eq!(results[0].1, Outcome::Unknown);
        assert_eq!(results[1].1, Outcome::bad_format());
        assert_eq!(service.client().limiter().total_calls(), 0);
        assert!(get_all_postal_codes(service.store().pool()).await.unwrap().is_empty());
        assert!(service.store().sink().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_finished_codes() {
        let (store, _dir) = temp_store().await;
        let api = ScriptedApi::resolving("Porto", "Porto").with_latency(Duration::from_millis(50));
        let service = EnrichmentService::new(api, store, fast_config(2));
        let shutdown = Shutdown::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            signal.cancel();
        });

        let batch: Vec<String> = (0..20).map(|i| format!("4000-{:03}", i)).collect();
        let results = service.enrich_batch_until(batch, &shutdown).await.unwrap();
        let summary = BatchSummary::from_results(&results);

        assert_eq!(results.len(), 20);
        assert!(summary.resolved > 0);
        assert!(summary.unknown > 0);
        assert_eq!(summary.invalid, 0);
        assert_eq!(summary.resolved + summary.unknown, 20);

        // Every reported success is on record, nothing else is
        let rows = get_all_postal_codes(service.store().pool()).await.unwrap();
        assert_eq!(rows.len(), summary.resolved);
        for (token, outcome) in &results {
            let stored = service.store().lookup(&normalize(token).unwrap()).await.unwrap();
            match outcome {
                Outcome::Resolved(_) => assert_eq!(stored.as_ref(), Some(outcome)),
                _ => assert_eq!(stored, None),
            }
        }

        // Cancelled codes are left for the next run, not logged as unresolved
        assert!(service.store().sink().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_do_not_stop_lookups() {
        let (store, _dir) = temp_store().await;
        sqlx::query("DROP TABLE invalid_postal_codes")
            .execute(store.pool())
            .await
            .unwrap();
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, fast_config(3));

        // Lookup fails so the code is fetched; the insert fails and is only logged
        let results = service.enrich_batch(tokens(&["4000-100"])).await.unwrap();
        assert_eq!(results[0].1, Outcome::resolved("Porto", "Porto"));
        assert_eq!(service.client().limiter().total_calls(), 1);
        assert!(get_all_postal_codes(service.store().pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_sink_keeps_outcomes() {
        let (pool, dir) = temp_db().await;
        let store = OutcomeStore::new(pool, UnresolvedSink::new(dir.path()));
        let api = ScriptedApi::always(timeout()).script(
            "1000-001",
            [Step::Respond(Err(EnrichmentError::ClientRejected { status: 404 }))],
        );
        let service = EnrichmentService::new(api, store, fast_config(3));

        let results = service
            .enrich_batch(tokens(&["1000-001", "1000-002"]))
            .await
            .unwrap();
        assert_eq!(results[0].1, Outcome::not_found());
        assert_eq!(results[1].1, Outcome::Unknown);

        // The rejection row survives the failed log append
        let rejected = normalize("1000-001").unwrap();
        assert_eq!(
            service.store().lookup(&rejected).await.unwrap(),
            Some(Outcome::not_found())
        );
        let pending = normalize("1000-002").unwrap();
        assert_eq!(service.store().lookup(&pending).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_batch() {
        let (store, _dir) = temp_store().await;
        store.pool().close().await;
        let service =
            EnrichmentService::new(ScriptedApi::resolving("Porto", "Porto"), store, fast_config(3));

        let err = service.enrich_batch(tokens(&["4000-100"])).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(service.client().limiter().total_calls(), 0);
    }

    #[test]
    fn test_batch_summary() {
        let results = vec![
            ("a".to_string(), Outcome::resolved("Porto", "Porto")),
            ("b".to_string(), Outcome::bad_format()),
            ("c".to_string(), Outcome::Unknown),
            ("d".to_string(), Outcome::not_found()),
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary, BatchSummary { resolved: 1, invalid: 2, unknown: 1 });
        assert_eq!(summary.total(), 4);
    }
}
