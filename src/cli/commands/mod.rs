//! CLI command definitions and dispatch.
//!
//! Each subcommand group is implemented in its own submodule:
//! - `enrich`: Batch enrichment and token normalization
//! - `store`: Listing and exporting stored outcomes
//! - `serve`: Read API and config inspection

mod enrich;
mod serve;
mod store;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::server::DEFAULT_ADDR;

pub use enrich::{cmd_enrich, cmd_normalize};
pub use serve::{cmd_config, cmd_serve};
pub use store::{cmd_export, cmd_list};

/// Portuguese postal code enricher
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the OS config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve every postal code in a CSV file
    Enrich {
        /// CSV file whose first column holds postal codes
        input: PathBuf,
        /// The first row is data, not a header
        #[arg(long)]
        no_header: bool,
        /// Postal code API key (or set CTT_API_KEY env var)
        #[arg(short, long, env = "CTT_API_KEY")]
        api_key: Option<String>,
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// File for codes that could not be resolved
        #[arg(long)]
        unresolved_log: Option<PathBuf>,
    },
    /// List stored postal codes, both resolved and rejected
    List,
    /// Export resolved postal codes to CSV
    Export {
        /// Output CSV path
        output: PathBuf,
    },
    /// Serve the read-only HTTP API
    Serve {
        /// Listen address
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: SocketAddr,
    },
    /// Show the canonical form of postal code tokens (no network)
    Normalize {
        /// Raw tokens, e.g. 4000100 or "4000,100"
        #[arg(required = true)]
        tokens: Vec<String>,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref());
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.storage.database.clone());

    match &cli.command {
        Commands::Enrich {
            input,
            no_header,
            api_key,
            workers,
            unresolved_log,
        } => {
            let rt = Runtime::new()?;
            cmd_enrich(
                &rt,
                &config,
                &db_path,
                input,
                !*no_header,
                api_key.as_deref(),
                *workers,
                unresolved_log.as_deref(),
            )
        }
        Commands::List => {
            let rt = Runtime::new()?;
            cmd_list(&rt, &db_path, &config.storage.unresolved_log)
        }
        Commands::Export { output } => {
            let rt = Runtime::new()?;
            cmd_export(&rt, &db_path, output)
        }
        Commands::Serve { addr } => {
            let rt = Runtime::new()?;
            cmd_serve(&rt, &db_path, *addr)
        }
        Commands::Normalize { tokens } => cmd_normalize(tokens),
        Commands::Config { init } => cmd_config(&config, cli.config.as_deref(), *init),
    }
}

/// Load config from `--config` or the default location.
fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enrich() {
        let cli = Cli::try_parse_from([
            "postal-enricher",
            "--db",
            "codes.db",
            "enrich",
            "input.csv",
            "--workers",
            "5",
            "--no-header",
        ])
        .unwrap();

        assert_eq!(cli.db, Some(PathBuf::from("codes.db")));
        match cli.command {
            Commands::Enrich {
                input,
                no_header,
                workers,
                ..
            } => {
                assert_eq!(input, PathBuf::from("input.csv"));
                assert!(no_header);
                assert_eq!(workers, Some(5));
            }
            _ => panic!("expected enrich"),
        }
    }

    #[test]
    fn test_serve_default_addr() {
        let cli = Cli::try_parse_from(["postal-enricher", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { addr } => assert_eq!(addr.port(), 5000),
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_normalize_requires_tokens() {
        assert!(Cli::try_parse_from(["postal-enricher", "normalize"]).is_err());
    }
}
