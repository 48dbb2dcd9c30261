//! Postal Enricher - resolves Portuguese postal codes to municipality and district.
//!
//! Reads raw codes from CSV, looks each one up against the CTT postal code
//! service under a shared rate budget, and records every outcome in SQLite.
//! The stored results can be listed, exported, or served over HTTP.

pub mod cli;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod ingest;
pub mod server;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("postal_enricher=info".parse()?))
        .init();

    cli::run_command(&args)
}
