use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use super::models::{
    CheckRecord, DueEndpoint, Endpoint, EndpointStatus, Network, NetworkType, Project,
    i64_to_timestamp, timestamp_to_i64,
};
use crate::monitoring::types::{EndpointKind, ErrorKind, HealthStatus};
use crate::pool::LibsqlPool;

/// Store trait for abstracting database operations
///
/// Catalog rows are written only by the config sync; checks and statuses only
/// by the scheduler's commit path. Everything else is the read-only query
/// surface consumed by the (external) API layer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a project by its unique slug
    async fn project_by_slug(&self, slug: &str) -> Result<Option<Project>>;

    /// Insert a project, returning its row id
    async fn insert_project(&self, project: &Project) -> Result<i64>;

    /// Update a project's display name
    async fn update_project_name(&self, project_id: i64, name: &str) -> Result<()>;

    /// All networks of a project
    async fn networks_of_project(&self, project_id: i64) -> Result<Vec<Network>>;

    /// Insert a network, returning its row id
    async fn insert_network(&self, network: &Network) -> Result<i64>;

    /// Update a network's mutable fields (name, chain id, type, thresholds)
    async fn update_network(&self, network: &Network) -> Result<()>;

    /// All endpoints of a network, enabled or not
    async fn endpoints_of_network(&self, network_id: i64) -> Result<Vec<Endpoint>>;

    /// Insert an endpoint, returning its row id
    async fn insert_endpoint(&self, endpoint: &Endpoint) -> Result<i64>;

    /// Update an endpoint's mutable fields (name, kind, enabled)
    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Flip only the enabled flag
    async fn set_endpoint_enabled(&self, endpoint_id: i64, enabled: bool) -> Result<()>;

    /// Enabled endpoints due for a check at `now`, joined with their network
    /// context, capped at `limit`. Never-checked endpoints are always due.
    async fn due_endpoints(
        &self,
        now: DateTime<Utc>,
        default_interval_seconds: u64,
        limit: usize,
    ) -> Result<Vec<DueEndpoint>>;

    /// Append one Check row and upsert the endpoint's current status, as a
    /// single transaction. The upsert drops writes older than the stored
    /// `last_checked` so straggling probe results cannot regress the status.
    async fn commit_check(&self, check: &CheckRecord, status: &EndpointStatus) -> Result<()>;

    /// All projects, ordered by slug
    async fn projects(&self) -> Result<Vec<Project>>;

    /// Current status per endpoint of one network (None when never checked)
    async fn endpoint_statuses(
        &self,
        project_slug: &str,
        network_slug: &str,
    ) -> Result<Vec<(Endpoint, Option<EndpointStatus>)>>;

    /// Current status of a single endpoint
    async fn status_of(&self, endpoint_id: i64) -> Result<Option<EndpointStatus>>;

    /// Check history of one endpoint over a time range, newest first
    async fn checks_between(
        &self,
        endpoint_uuid: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>>;
}

/// LibSQL store implementation
pub struct StoreImpl {
    pool: LibsqlPool,
}

impl StoreImpl {
    /// Create a new store instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn project_from_row(row: &libsql::Row) -> Result<Project> {
    Ok(Project {
        id: Some(row.get(0)?),
        slug: row.get(1)?,
        name: row.get(2)?,
        created_at: i64_to_timestamp(row.get(3)?),
    })
}

fn network_from_row(row: &libsql::Row) -> Result<Network> {
    let network_type: String = row.get(5)?;
    Ok(Network {
        id: Some(row.get(0)?),
        project_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        chain_id: row.get(4)?,
        network_type: NetworkType::parse(&network_type),
        check_interval_seconds: row.get::<Option<i64>>(6)?.map(|v| v as u64),
        stale_after_seconds: row.get::<Option<i64>>(7)?.map(|v| v as u64),
        max_height_lag: row.get::<Option<i64>>(8)?.map(|v| v as u64),
        created_at: i64_to_timestamp(row.get(9)?),
    })
}

fn endpoint_from_row(row: &libsql::Row) -> Result<Endpoint> {
    let uuid_str: String = row.get(1)?;
    let kind: String = row.get(4)?;
    Ok(Endpoint {
        id: Some(row.get(0)?),
        uuid: Uuid::parse_str(&uuid_str)?,
        network_id: row.get(2)?,
        name: row.get(3)?,
        // rows written before a kind was retired keep probing as plain REST
        kind: EndpointKind::parse(&kind).unwrap_or(EndpointKind::Api),
        url: row.get(5)?,
        enabled: row.get::<i64>(6)? != 0,
        created_at: i64_to_timestamp(row.get(7)?),
    })
}

const ENDPOINT_COLUMNS: &str = "id, uuid, network_id, name, kind, url, enabled, created_at";

#[async_trait]
impl Store for StoreImpl {
    async fn project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT id, slug, name, created_at FROM projects WHERE slug = ?", params![slug])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(project_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_project(&self, project: &Project) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO projects (slug, name, created_at) VALUES (?, ?, ?)",
            params![
                project.slug.clone(),
                project.name.clone(),
                timestamp_to_i64(project.created_at)
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn update_project_name(&self, project_id: i64, name: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("UPDATE projects SET name = ? WHERE id = ?", params![name, project_id]).await?;
        Ok(())
    }

    async fn networks_of_project(&self, project_id: i64) -> Result<Vec<Network>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, project_id, slug, name, chain_id, network_type, check_interval_seconds, stale_after_seconds, max_height_lag, created_at FROM networks WHERE project_id = ?",
            )
            .await?;

        let mut rows = stmt.query(params![project_id]).await?;
        let mut networks = Vec::new();
        while let Some(row) = rows.next().await? {
            networks.push(network_from_row(&row)?);
        }
        Ok(networks)
    }

    async fn insert_network(&self, network: &Network) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO networks (project_id, slug, name, chain_id, network_type, check_interval_seconds, stale_after_seconds, max_height_lag, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                network.project_id,
                network.slug.clone(),
                network.name.clone(),
                network.chain_id.clone(),
                network.network_type.as_str(),
                network.check_interval_seconds.map(|v| v as i64),
                network.stale_after_seconds.map(|v| v as i64),
                network.max_height_lag.map(|v| v as i64),
                timestamp_to_i64(network.created_at)
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn update_network(&self, network: &Network) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE networks SET name = ?, chain_id = ?, network_type = ?, check_interval_seconds = ?, stale_after_seconds = ?, max_height_lag = ? WHERE id = ?",
            params![
                network.name.clone(),
                network.chain_id.clone(),
                network.network_type.as_str(),
                network.check_interval_seconds.map(|v| v as i64),
                network.stale_after_seconds.map(|v| v as i64),
                network.max_height_lag.map(|v| v as i64),
                network.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn endpoints_of_network(&self, network_id: i64) -> Result<Vec<Endpoint>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE network_id = ?"))
            .await?;

        let mut rows = stmt.query(params![network_id]).await?;
        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(endpoint_from_row(&row)?);
        }
        Ok(endpoints)
    }

    async fn insert_endpoint(&self, endpoint: &Endpoint) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO endpoints (uuid, network_id, name, kind, url, enabled, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                endpoint.uuid.to_string(),
                endpoint.network_id,
                endpoint.name.clone(),
                endpoint.kind.as_str(),
                endpoint.url.clone(),
                if endpoint.enabled { 1 } else { 0 },
                timestamp_to_i64(endpoint.created_at)
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE endpoints SET name = ?, kind = ?, enabled = ? WHERE id = ?",
            params![
                endpoint.name.clone(),
                endpoint.kind.as_str(),
                if endpoint.enabled { 1 } else { 0 },
                endpoint.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_endpoint_enabled(&self, endpoint_id: i64, enabled: bool) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE endpoints SET enabled = ? WHERE id = ?",
            params![if enabled { 1 } else { 0 }, endpoint_id],
        )
        .await?;
        Ok(())
    }

    async fn due_endpoints(
        &self,
        now: DateTime<Utc>,
        default_interval_seconds: u64,
        limit: usize,
    ) -> Result<Vec<DueEndpoint>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.uuid, e.name, e.kind, e.url,
                        n.id, n.slug, n.chain_id, n.stale_after_seconds, n.max_height_lag
                 FROM endpoints e
                 JOIN networks n ON n.id = e.network_id
                 LEFT JOIN endpoint_status s ON s.endpoint_id = e.id
                 WHERE e.enabled = 1
                   AND (s.endpoint_id IS NULL
                        OR s.last_checked + COALESCE(n.check_interval_seconds, ?) <= ?)
                 ORDER BY e.id
                 LIMIT ?",
            )
            .await?;

        let mut rows = stmt
            .query(params![default_interval_seconds as i64, timestamp_to_i64(now), limit as i64])
            .await?;

        let mut due = Vec::new();
        while let Some(row) = rows.next().await? {
            let uuid_str: String = row.get(1)?;
            let kind: String = row.get(3)?;
            due.push(DueEndpoint {
                endpoint_id: row.get(0)?,
                uuid: Uuid::parse_str(&uuid_str)?,
                name: row.get(2)?,
                kind: EndpointKind::parse(&kind).unwrap_or(EndpointKind::Api),
                url: row.get(4)?,
                network_id: row.get(5)?,
                network_slug: row.get(6)?,
                chain_id: row.get(7)?,
                stale_after_seconds: row.get::<Option<i64>>(8)?.map(|v| v as u64),
                max_height_lag: row.get::<Option<i64>>(9)?.map(|v| v as u64),
            });
        }
        Ok(due)
    }

    async fn commit_check(&self, check: &CheckRecord, status: &EndpointStatus) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        tx.execute(
            "INSERT INTO checks (endpoint_id, checked_at, success, http_status, latency_ms, block_height, block_time, error_kind, error_detail) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                check.endpoint_id,
                timestamp_to_i64(check.checked_at),
                if check.success { 1 } else { 0 },
                check.http_status.map(|v| v as i64),
                check.latency_ms as i64,
                check.block_height.map(|v| v as i64),
                check.block_time.map(timestamp_to_i64),
                check.error_kind.map(|k| k.as_str().to_string()),
                check.error_detail.clone()
            ],
        )
        .await?;

        tx.execute(
            "INSERT INTO endpoint_status (endpoint_id, last_checked, status, latency_ms, http_status, block_height, block_delay, is_stale, error_detail)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (endpoint_id) DO UPDATE SET
                last_checked = excluded.last_checked,
                status = excluded.status,
                latency_ms = excluded.latency_ms,
                http_status = excluded.http_status,
                block_height = excluded.block_height,
                block_delay = excluded.block_delay,
                is_stale = excluded.is_stale,
                error_detail = excluded.error_detail
             WHERE excluded.last_checked >= endpoint_status.last_checked",
            params![
                status.endpoint_id,
                timestamp_to_i64(status.last_checked),
                status.status.as_str(),
                status.latency_ms as i64,
                status.http_status.map(|v| v as i64),
                status.block_height.map(|v| v as i64),
                status.block_delay.map(|v| v as i64),
                if status.is_stale { 1 } else { 0 },
                status.error_detail.clone()
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn projects(&self) -> Result<Vec<Project>> {
        let conn = self.get_conn().await?;
        let mut rows =
            conn.query("SELECT id, slug, name, created_at FROM projects ORDER BY slug", ()).await?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(project_from_row(&row)?);
        }
        Ok(projects)
    }

    async fn endpoint_statuses(
        &self,
        project_slug: &str,
        network_slug: &str,
    ) -> Result<Vec<(Endpoint, Option<EndpointStatus>)>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.uuid, e.network_id, e.name, e.kind, e.url, e.enabled, e.created_at,
                        s.last_checked, s.status, s.latency_ms, s.http_status, s.block_height, s.block_delay, s.is_stale, s.error_detail
                 FROM endpoints e
                 JOIN networks n ON n.id = e.network_id
                 JOIN projects p ON p.id = n.project_id
                 LEFT JOIN endpoint_status s ON s.endpoint_id = e.id
                 WHERE p.slug = ? AND n.slug = ?
                 ORDER BY e.kind, e.name",
            )
            .await?;

        let mut rows = stmt.query(params![project_slug, network_slug]).await?;
        let mut statuses = Vec::new();
        while let Some(row) = rows.next().await? {
            let endpoint = endpoint_from_row(&row)?;
            let status = match row.get::<Option<i64>>(8)? {
                None => None,
                Some(last_checked) => {
                    let status_str: String = row.get(9)?;
                    Some(EndpointStatus {
                        endpoint_id: endpoint.id.unwrap_or_default(),
                        last_checked: i64_to_timestamp(last_checked),
                        status: HealthStatus::parse(&status_str),
                        latency_ms: row.get::<i64>(10)? as u64,
                        http_status: row.get::<Option<i64>>(11)?.map(|v| v as u16),
                        block_height: row.get::<Option<i64>>(12)?.map(|v| v as u64),
                        block_delay: row.get::<Option<i64>>(13)?.map(|v| v as u64),
                        is_stale: row.get::<i64>(14)? != 0,
                        error_detail: row.get(15)?,
                    })
                }
            };
            statuses.push((endpoint, status));
        }
        Ok(statuses)
    }

    async fn status_of(&self, endpoint_id: i64) -> Result<Option<EndpointStatus>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT endpoint_id, last_checked, status, latency_ms, http_status, block_height, block_delay, is_stale, error_detail FROM endpoint_status WHERE endpoint_id = ?",
                params![endpoint_id],
            )
            .await?;

        match rows.next().await? {
            None => Ok(None),
            Some(row) => {
                let status_str: String = row.get(2)?;
                Ok(Some(EndpointStatus {
                    endpoint_id: row.get(0)?,
                    last_checked: i64_to_timestamp(row.get(1)?),
                    status: HealthStatus::parse(&status_str),
                    latency_ms: row.get::<i64>(3)? as u64,
                    http_status: row.get::<Option<i64>>(4)?.map(|v| v as u16),
                    block_height: row.get::<Option<i64>>(5)?.map(|v| v as u64),
                    block_delay: row.get::<Option<i64>>(6)?.map(|v| v as u64),
                    is_stale: row.get::<i64>(7)? != 0,
                    error_detail: row.get(8)?,
                }))
            }
        }
    }

    async fn checks_between(
        &self,
        endpoint_uuid: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.endpoint_id, c.checked_at, c.success, c.http_status, c.latency_ms, c.block_height, c.block_time, c.error_kind, c.error_detail
                 FROM checks c
                 JOIN endpoints e ON e.id = c.endpoint_id
                 WHERE e.uuid = ? AND c.checked_at >= ? AND c.checked_at <= ?
                 ORDER BY c.checked_at DESC",
            )
            .await?;

        let mut rows = stmt
            .query(params![endpoint_uuid.to_string(), timestamp_to_i64(from), timestamp_to_i64(to)])
            .await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            checks.push(CheckRecord {
                id: Some(row.get(0)?),
                endpoint_id: row.get(1)?,
                checked_at: i64_to_timestamp(row.get(2)?),
                success: row.get::<i64>(3)? != 0,
                http_status: row.get::<Option<i64>>(4)?.map(|v| v as u16),
                latency_ms: row.get::<i64>(5)? as u64,
                block_height: row.get::<Option<i64>>(6)?.map(|v| v as u64),
                block_time: row.get::<Option<i64>>(7)?.map(i64_to_timestamp),
                error_kind: row.get::<Option<String>>(8)?.map(|k| ErrorKind::parse(&k)),
                error_detail: row.get(9)?,
            });
        }
        Ok(checks)
    }
}
