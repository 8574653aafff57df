//! Pool setup and migration runner, modeled on `iwismer-rusty-timer`'s
//! `db.rs` (connect + `sqlx::migrate!` at boot).

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Opens the SQLite pool backing the persistence gateway.
///
/// A single connection is used deliberately: SQLite serializes writers at
/// the file level regardless, so a bigger pool buys nothing for writes and
/// only adds lock contention (§4.2: "MUST serialize writes safely under
/// concurrent callers... single-writer queue... or equivalent").
pub async fn create_pool(sqlite_path: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(sqlite_path)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("connect to sqlite store")
}

/// Runs embedded migrations. Called once at boot before the listener binds.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("run database migrations")
}
