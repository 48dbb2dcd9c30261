//! Batch ingestion from CSV.
//!
//! Only the first column matters; any further columns are ignored and rows
//! may have different lengths. Tokens are returned exactly as written so
//! the batch report can echo them back.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result, ResultExt};

/// Read raw postal code tokens from the first column of a CSV file.
pub fn read_tokens(path: &Path, has_header: bool) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(Error::not_found(path));
    }

    let file = std::fs::File::open(path)
        .with_context(format!("Failed to open CSV file: {}", path.display()))?;
    read_tokens_from(file, has_header)
        .with_context(format!("Failed to read CSV file: {}", path.display()))
}

/// Read tokens from any CSV source.
pub fn read_tokens_from<R: Read>(source: R, has_header: bool) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(source);

    let mut tokens = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(format!("Failed to read row {}", idx + 1))?;
        match record.get(0) {
            Some(cell) if !cell.trim().is_empty() => tokens.push(cell.to_string()),
            _ => tracing::debug!(row = idx + 1, "Skipping row without a postal code"),
        }
    }

    tracing::info!(tokens = tokens.len(), "Read postal codes from CSV");
    Ok(tokens)
}
