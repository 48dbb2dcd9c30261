//! Test utilities and fixtures for postal-enricher tests.
//!
//! This module provides database and store helpers to reduce boilerplate
//! in tests.
//!
//! # Example
//!
//! ```ignore
//! use postal_enricher::test_utils::temp_store;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (store, _dir) = temp_store().await;
//!     // ... test logic
//! }
//! ```

use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::db::{OutcomeStore, UnresolvedSink};

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// # Returns
///
/// A tuple of (connection pool, temp directory handle).
/// Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates a temporary outcome store.
///
/// The unresolved sink lives next to the database as `unresolved.log`.
pub async fn temp_store() -> (OutcomeStore, TempDir) {
    let (pool, dir) = temp_db().await;
    let sink = UnresolvedSink::new(dir.path().join("unresolved.log"));
    (OutcomeStore::new(pool, sink), dir)
}

/// Inserts a resolved row directly, bypassing the store.
pub async fn insert_resolved(pool: &SqlitePool, code: &str, concelho: &str, distrito: &str) {
    sqlx::query("INSERT INTO postal_codes (codigo_postal, concelho, distrito) VALUES (?, ?, ?)")
        .bind(code)
        .bind(concelho)
        .bind(distrito)
        .execute(pool)
        .await
        .expect("Failed to insert postal code");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        // Should be able to query
        let rows = crate::db::get_all_postal_codes(&pool).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_temp_store_sink_lives_in_temp_dir() {
        let (store, dir) = temp_store().await;
        assert!(store.sink().path().starts_with(dir.path()));
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_resolved() {
        let (pool, _dir) = temp_db().await;
        insert_resolved(&pool, "4000-100", "Porto", "Porto").await;

        let rows = crate::db::get_all_postal_codes(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].concelho, "Porto");
    }
}
