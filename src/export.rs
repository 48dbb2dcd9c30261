//! CSV export of resolved postal codes.

use std::io::Write;
use std::path::Path;

use sqlx::SqlitePool;

use crate::db::{self, PostalCodeRecord};
use crate::error::{Result, ResultExt};

/// Header row of the export file.
pub const EXPORT_HEADER: [&str; 3] = ["Código Postal", "Município", "Distrito"];

/// Write every resolved postal code to `path`. Returns the row count.
pub async fn export_csv(pool: &SqlitePool, path: &Path) -> Result<usize> {
    let records = db::get_all_postal_codes(pool)
        .await
        .with_context("Failed to load postal codes for export")?;

    let file = std::fs::File::create(path)
        .with_context(format!("Failed to create {}", path.display()))?;
    write_records(file, &records)?;

    tracing::info!(rows = records.len(), path = %path.display(), "Exported postal codes");
    Ok(records.len())
}

/// Write records as CSV to any sink.
pub fn write_records<W: Write>(sink: W, records: &[PostalCodeRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(EXPORT_HEADER)?;
    for record in records {
        writer.write_record([&record.codigo_postal, &record.concelho, &record.distrito])?;
    }
    writer.flush()?;
    Ok(())
}
