//! Outcome store: durable, deduplicated enrichment results.
//!
//! Uses SQLx with SQLite. Two tables share one key space:
//! - `postal_codes` - resolved codes (`codigo_postal`, `concelho`, `distrito`)
//! - `invalid_postal_codes` - codes the service rejected conclusively
//!
//! A code lives in at most one of them. Commits are first-write-wins: a
//! second commit for a code already present is a no-op reported as
//! [`CommitResult::Conflict`]. Codes that stay unresolved after all attempts
//! only go to the [`UnresolvedSink`], so a later run can try them again.
//!
//! # Example
//!
//! ```ignore
//! use postal_enricher::db::{init_db, OutcomeStore, UnresolvedSink};
//!
//! let pool = init_db("sqlite:codigos_postais_database.db").await?;
//! let store = OutcomeStore::new(pool, UnresolvedSink::new("unresolved.log"));
//! if store.lookup(&code).await?.is_none() {
//!     store.commit(&code, &outcome).await?;
//! }
//! ```

mod unresolved;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::enrichment::domain::{CanonicalCode, InvalidReason, Location, Outcome};
use crate::error::Result;

pub use unresolved::{DEFAULT_UNRESOLVED_LOG, UnresolvedEntry, UnresolvedSink};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "codigos_postais_database.db";

/// Reason written to the sink for codes whose attempts were exhausted.
pub const UNRESOLVED_REASON: &str = "unresolved";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations. WAL mode
/// and a busy timeout let concurrent workers commit without `SQLITE_BUSY`.
///
/// # Errors
///
/// Returns an error if:
/// - The URL is malformed
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// A resolved row as stored in `postal_codes`.
///
/// This is what the export and read API collaborators see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PostalCodeRecord {
    pub codigo_postal: String,
    pub concelho: String,
    pub distrito: String,
}

/// Get all resolved postal codes, ordered by code.
pub async fn get_all_postal_codes(pool: &SqlitePool) -> sqlx::Result<Vec<PostalCodeRecord>> {
    sqlx::query_as::<_, PostalCodeRecord>(
        "SELECT codigo_postal, concelho, distrito FROM postal_codes ORDER BY codigo_postal",
    )
    .fetch_all(pool)
    .await
}

/// Get one resolved postal code.
pub async fn get_postal_code(
    pool: &SqlitePool,
    code: &str,
) -> sqlx::Result<Option<PostalCodeRecord>> {
    sqlx::query_as::<_, PostalCodeRecord>(
        "SELECT codigo_postal, concelho, distrito FROM postal_codes WHERE codigo_postal = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
}

/// A stored rejection from `invalid_postal_codes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct InvalidCodeRecord {
    pub codigo_postal: String,
    pub reason: String,
    pub recorded_at: String,
}

/// Get every code the lookup service rejected, ordered by code.
pub async fn get_invalid_postal_codes(pool: &SqlitePool) -> sqlx::Result<Vec<InvalidCodeRecord>> {
    sqlx::query_as::<_, InvalidCodeRecord>(
        "SELECT codigo_postal, reason, recorded_at FROM invalid_postal_codes ORDER BY codigo_postal",
    )
    .fetch_all(pool)
    .await
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub resolved: i64,
    pub invalid: i64,
}

/// Count stored outcomes.
pub async fn get_summary(pool: &SqlitePool) -> sqlx::Result<StoreSummary> {
    let (resolved,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM postal_codes")
        .fetch_one(pool)
        .await?;
    let (invalid,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM invalid_postal_codes")
        .fetch_one(pool)
        .await?;
    Ok(StoreSummary { resolved, invalid })
}

/// What a [`OutcomeStore::commit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// New row written.
    Inserted,
    /// The code already had a stored outcome; nothing changed.
    Conflict,
    /// Unknown outcome appended to the unresolved sink only.
    Deferred,
    /// Outcome never stored (malformed input).
    Skipped,
}

/// The system of record for processed codes.
///
/// Cheap to clone: the pool and the sink are shared handles.
#[derive(Debug, Clone)]
pub struct OutcomeStore {
    pool: SqlitePool,
    sink: UnresolvedSink,
}

impl OutcomeStore {
    pub fn new(pool: SqlitePool, sink: UnresolvedSink) -> Self {
        Self { pool, sink }
    }

    /// Open (creating if needed) the database at `db_url`.
    pub async fn open(db_url: &str, sink: UnresolvedSink) -> Result<Self> {
        let pool = init_db(db_url).await?;
        Ok(Self::new(pool, sink))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sink(&self) -> &UnresolvedSink {
        &self.sink
    }

    /// Cheap round trip to prove the database is reachable.
    pub async fn ping(&self) -> sqlx::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Stored outcome for `code`, if any.
    ///
    /// Only `Resolved` and `Invalid { NotFound }` are ever stored; `None`
    /// means the code still needs a lookup.
    pub async fn lookup(&self, code: &CanonicalCode) -> sqlx::Result<Option<Outcome>> {
        if let Some(record) = get_postal_code(&self.pool, code.as_str()).await? {
            return Ok(Some(Outcome::Resolved(Location {
                municipality: record.concelho,
                district: record.distrito,
            })));
        }

        let invalid: Option<(String,)> =
            sqlx::query_as("SELECT reason FROM invalid_postal_codes WHERE codigo_postal = ?")
                .bind(code.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(invalid.map(|(reason,)| Outcome::Invalid {
            reason: reason.parse().unwrap_or(InvalidReason::NotFound),
        }))
    }

    /// Persist an outcome for `code`.
    ///
    /// Each insert is one statement that checks both tables, so two workers
    /// committing the same code cannot both succeed.
    pub async fn commit(&self, code: &CanonicalCode, outcome: &Outcome) -> Result<CommitResult> {
        let result = match outcome {
            Outcome::Resolved(location) => self.insert_resolved(code, location).await?,
            Outcome::Invalid {
                reason: InvalidReason::NotFound,
            } => {
                let result = self.insert_invalid(code, InvalidReason::NotFound).await?;
                if result == CommitResult::Inserted {
                    // The row is already the record; a lost log line must not undo it
                    if let Err(e) = self
                        .sink
                        .append(code.as_str(), InvalidReason::NotFound.as_str())
                        .await
                    {
                        tracing::warn!(
                            code = %code,
                            path = ?self.sink.path(),
                            error = %e,
                            "Stored invalid code but could not append it to the unresolved log"
                        );
                    }
                }
                result
            }
            Outcome::Invalid {
                reason: InvalidReason::BadFormat,
            } => CommitResult::Skipped,
            Outcome::Unknown => {
                self.sink.append(code.as_str(), UNRESOLVED_REASON).await?;
                CommitResult::Deferred
            }
        };

        if result == CommitResult::Conflict {
            tracing::warn!(code = %code, outcome = outcome.label(), "Postal code already stored, keeping existing record");
        }

        Ok(result)
    }

    async fn insert_resolved(
        &self,
        code: &CanonicalCode,
        location: &Location,
    ) -> sqlx::Result<CommitResult> {
        let result = sqlx::query(
            r#"
            INSERT INTO postal_codes (codigo_postal, concelho, distrito)
            SELECT ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM invalid_postal_codes WHERE codigo_postal = ?)
            ON CONFLICT(codigo_postal) DO NOTHING
            "#,
        )
        .bind(code.as_str())
        .bind(&location.municipality)
        .bind(&location.district)
        .bind(code.as_str())
        .execute(&self.pool)
        .await?;

        Ok(inserted_or_conflict(result.rows_affected()))
    }

    async fn insert_invalid(
        &self,
        code: &CanonicalCode,
        reason: InvalidReason,
    ) -> sqlx::Result<CommitResult> {
        let result = sqlx::query(
            r#"
            INSERT INTO invalid_postal_codes (codigo_postal, reason, recorded_at)
            SELECT ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM postal_codes WHERE codigo_postal = ?)
            ON CONFLICT(codigo_postal) DO NOTHING
            "#,
        )
        .bind(code.as_str())
        .bind(reason.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(code.as_str())
        .execute(&self.pool)
        .await?;

        Ok(inserted_or_conflict(result.rows_affected()))
    }
}

fn inserted_or_conflict(rows_affected: u64) -> CommitResult {
    if rows_affected == 0 {
        CommitResult::Conflict
    } else {
        CommitResult::Inserted
    }
}
