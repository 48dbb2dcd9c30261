//! Append-only log of codes that could not be resolved.
//!
//! Operators read this file to follow up offline; the batch engine never
//! reads it back, only `list` counts it. One line per entry:
//!
//! ```text
//! 2026-10-18T09:12:44.120+00:00	1000-001	not found
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

/// Default sink filename.
pub const DEFAULT_UNRESOLVED_LOG: &str = "unresolved_postal_codes.log";

/// One parsed line of the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEntry {
    pub recorded_at: String,
    pub code: String,
    pub reason: String,
}

/// Handle to the unresolved-code file. Clones share the same write lock.
#[derive(Debug, Clone)]
pub struct UnresolvedSink {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl UnresolvedSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Creates the file on first use.
    pub async fn append(&self, code: &str, reason: &str) -> std::io::Result<()> {
        let line = format!("{}\t{}\t{}\n", Utc::now().to_rfc3339(), code, reason);
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock();
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())
        })
        .await
        .map_err(std::io::Error::other)?
    }

    /// Read every entry back. A missing file means no entries.
    pub fn entries(&self) -> std::io::Result<Vec<UnresolvedEntry>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(contents.lines().filter_map(parse_line).collect())
    }
}

fn parse_line(line: &str) -> Option<UnresolvedEntry> {
    let mut parts = line.splitn(3, '\t');
    let recorded_at = parts.next()?.to_string();
    let code = parts.next()?.to_string();
    let reason = parts.next().unwrap_or_default().to_string();
    Some(UnresolvedEntry {
        recorded_at,
        code,
        reason,
    })
}
