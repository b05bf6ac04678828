//! State-store pool construction.
//!
//! The store opens straight from [`DatabaseConfig`]: the configured file
//! path and connection cap flow in here, the pragma set is fixed (WAL,
//! foreign keys on), and the pool is probed once before it is handed to
//! the repositories.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::DatabaseConfig;

/// Pragmas every store connection runs with, file-backed or in-memory:
/// WAL for concurrent readers under serialised writers, foreign keys on
/// so the design/PR child rows stay consistent, and a busy timeout that
/// outlasts any single route action.
fn store_pragmas(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30))
}

/// Open (or create) the state store described by `config`.
///
/// Creates the parent directory when missing and verifies the pool
/// answers before returning it.
pub async fn open_store(config: &DatabaseConfig) -> DomainResult<SqlitePool> {
    let path = Path::new(&config.path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DomainError::DatabaseError(format!(
                    "creating state-store directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }

    let options = store_pragmas(
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
    );
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
        .map_err(|e| {
            DomainError::DatabaseError(format!("opening state store at {}: {e}", config.path))
        })?;

    verify_store(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests, carrying the same pragma set as the real
/// store (an in-memory database ignores the WAL request; the rest apply).
/// A single connection keeps the schema visible to every caller.
pub async fn create_test_pool() -> DomainResult<SqlitePool> {
    let options = store_pragmas(SqliteConnectOptions::new().in_memory(true).shared_cache(true));
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| DomainError::DatabaseError(format!("opening in-memory store: {e}")))
}

async fn verify_store(pool: &SqlitePool) -> DomainResult<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| DomainError::DatabaseError(format!("state store not answering: {e}")))?;
    Ok(())
}
