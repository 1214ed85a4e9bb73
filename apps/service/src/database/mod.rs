/// Database abstraction layer
///
/// This module provides a unified interface over the catalog, check history,
/// and current-status tables, backed by LibSQL (SQLite).

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Store, StoreImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
