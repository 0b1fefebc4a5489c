//! SQLite helpers: one pool for all client-owned state, migrated on open.
//!
//! Migrations live in `migrations/` at the crate root and are embedded with
//! `sqlx::migrate!()`.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// Open (creating if needed) the SQLite pool and run pending migrations.
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    // Each in-memory connection is its own database, so keep exactly one.
    let in_memory = db_url.contains(":memory:");
    let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
    if in_memory {
        options = options.idle_timeout(None).max_lifetime(None);
    }
    let pool = options
        .connect(db_url)
        .await
        .with_context(|| format!("failed to open SQLite database: {db_url}"))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run local migrations")?;

    info!("[DB] local database ready: {}", db_url);
    Ok(pool)
}
