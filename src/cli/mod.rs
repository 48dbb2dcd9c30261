//! Command-line interface for postal-enricher.
//!
//! This module provides CLI commands for enriching a CSV batch of postal
//! codes, inspecting and exporting the store, and serving the read API.

mod commands;

pub use commands::{Cli, Commands, run_command};
