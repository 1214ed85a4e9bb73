use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations
///
/// This is the single source of truth for the database schema; readers of the
/// status tables must not run their own migrations.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: catalog tables plus check history and current status
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS networks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            chain_id TEXT NOT NULL,
            network_type TEXT NOT NULL,
            check_interval_seconds INTEGER,
            stale_after_seconds INTEGER,
            max_height_lag INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE (project_id, slug),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS endpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            network_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            url TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            UNIQUE (network_id, url),
            FOREIGN KEY (network_id) REFERENCES networks(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    // Append-only probe history; rows are never updated
    conn.execute(
        "CREATE TABLE IF NOT EXISTS checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint_id INTEGER NOT NULL,
            checked_at INTEGER NOT NULL,
            success INTEGER NOT NULL,
            http_status INTEGER,
            latency_ms INTEGER NOT NULL,
            block_height INTEGER,
            block_time INTEGER,
            error_kind TEXT,
            error_detail TEXT,
            FOREIGN KEY (endpoint_id) REFERENCES endpoints(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    // One row per endpoint, upserted after every check
    conn.execute(
        "CREATE TABLE IF NOT EXISTS endpoint_status (
            endpoint_id INTEGER PRIMARY KEY,
            last_checked INTEGER NOT NULL,
            status TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            http_status INTEGER,
            block_height INTEGER,
            block_delay INTEGER,
            is_stale INTEGER NOT NULL,
            error_detail TEXT,
            FOREIGN KEY (endpoint_id) REFERENCES endpoints(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_networks_project ON networks(project_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_endpoints_network ON endpoints(network_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_endpoints_enabled ON endpoints(enabled)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_checks_endpoint_checked ON checks(endpoint_id, checked_at DESC)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_checks_checked_at ON checks(checked_at DESC)", ()).await?;

    Ok(())
}
