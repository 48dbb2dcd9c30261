//! Store inspection and export commands.

use std::path::Path;
use tokio::runtime::Runtime;

use crate::db::{self, UnresolvedSink};
use crate::export;

/// List stored postal codes and the size of the unresolved log
pub fn cmd_list(rt: &Runtime, db_path: &Path, unresolved_log: &Path) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(db_path))).await?;

        let rows = db::get_all_postal_codes(&pool).await?;
        for row in &rows {
            println!("  ✓ {}  {} / {}", row.codigo_postal, row.concelho, row.distrito);
        }

        let invalid = db::get_invalid_postal_codes(&pool).await?;
        for row in &invalid {
            println!("  ✗ {}  {} ({})", row.codigo_postal, row.reason, row.recorded_at);
        }

        let summary = db::get_summary(&pool).await?;
        println!();
        println!(
            "{} resolved, {} invalid",
            summary.resolved, summary.invalid
        );

        let entries = UnresolvedSink::new(unresolved_log).entries()?;
        if let Some(last) = entries.last() {
            println!(
                "{} entries in {:?}, latest {} ({}) at {}",
                entries.len(),
                unresolved_log,
                last.code,
                last.reason,
                last.recorded_at
            );
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// Export resolved postal codes to CSV
pub fn cmd_export(rt: &Runtime, db_path: &Path, output: &Path) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(db_path))).await?;
        let rows = export::export_csv(&pool, output).await?;
        println!("Exported {} postal codes to {:?}", rows, output);
        Ok::<_, anyhow::Error>(())
    })
}
