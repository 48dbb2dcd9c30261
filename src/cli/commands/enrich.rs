//! Batch enrichment and normalization commands.

use std::path::Path;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::db::{self, OutcomeStore, UnresolvedSink};
use crate::enrichment::{BatchSummary, EnrichmentService, Outcome, Shutdown, normalize};
use crate::ingest;

/// Resolve every postal code in a CSV file
#[allow(clippy::too_many_arguments)]
pub fn cmd_enrich(
    rt: &Runtime,
    config: &Config,
    db_path: &Path,
    input: &Path,
    has_header: bool,
    api_key: Option<&str>,
    workers: Option<usize>,
    unresolved_log: Option<&Path>,
) -> anyhow::Result<()> {
    let Some(api_key) = api_key.or(config.api.api_key.as_deref()) else {
        anyhow::bail!(
            "Postal code API key required. Use --api-key YOUR_KEY, set CTT_API_KEY, \
             or add api_key under [api] in the config file"
        );
    };

    let tokens = ingest::read_tokens(input, has_header)?;
    if tokens.is_empty() {
        println!("No postal codes found in {}", input.display());
        return Ok(());
    }

    let mut enrichment = config.enrichment();
    if let Some(workers) = workers {
        enrichment.workers = workers;
    }
    let sink = UnresolvedSink::new(
        unresolved_log.unwrap_or(config.storage.unresolved_log.as_path()),
    );

    rt.block_on(async {
        let store = OutcomeStore::open(&db::db_url(Some(db_path)), sink).await?;
        let service = EnrichmentService::with_ctt(
            api_key,
            &config.api.base_url,
            config.api.timeout(),
            store,
            enrichment,
        )?;

        let shutdown = Shutdown::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after in-flight lookups");
                signal.cancel();
            }
        });

        println!("Enriching {} postal codes from {:?}", tokens.len(), input);
        println!();

        let results = service.enrich_batch_until(tokens, &shutdown).await?;
        for (token, outcome) in &results {
            let marker = match outcome {
                Outcome::Resolved(_) => "✓",
                Outcome::Invalid { .. } => "✗",
                Outcome::Unknown => "?",
            };
            println!("  {} {:<12} {}", marker, token, outcome);
        }

        let summary = BatchSummary::from_results(&results);
        println!();
        println!("Enrichment Summary");
        println!("==================");
        println!("Total:       {}", summary.total());
        println!("  ✓ Resolved: {}", summary.resolved);
        println!("  ✗ Invalid:  {}", summary.invalid);
        println!("  ? Unknown:  {}", summary.unknown);
        println!("API calls:   {}", service.client().limiter().total_calls());

        let stored = db::get_summary(service.store().pool()).await?;
        println!(
            "Stored:      {} resolved, {} invalid",
            stored.resolved, stored.invalid
        );
        if summary.unknown > 0 {
            println!();
            println!(
                "Unresolved codes were logged to {:?}; run again to retry them.",
                service.store().sink().path()
            );
        }
        if shutdown.is_cancelled() {
            println!("Run was interrupted before every code was processed.");
        }

        Ok::<_, anyhow::Error>(())
    })
}

/// Show the canonical form of raw tokens
pub fn cmd_normalize(tokens: &[String]) -> anyhow::Result<()> {
    for token in tokens {
        match normalize(token) {
            Ok(code) => println!("{:<14} {}", token, code),
            Err(e) => println!("{:<14} invalid: {}", token, e),
        }
    }
    Ok(())
}
