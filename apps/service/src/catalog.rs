//! Catalog synchronization from the declarative config.
//!
//! Projects and networks are matched by slug, endpoints by URL. Re-applying
//! the same config is a no-op; endpoints that disappear from the config are
//! disabled rather than deleted so their check history survives.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use url::Url;

use crate::config::{EndpointConfig, NetworkConfig, ProjectConfig};
use crate::database::Store;
use crate::database::models::{Endpoint, Network, Project};

/// Counters for one sync run
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub disabled: usize,
    pub skipped: usize,
}

/// Endpoints must be plain http(s) URLs before they enter the catalog
pub fn validate_endpoint_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("unsupported scheme for endpoint: {other}")),
    }
}

/// Synchronize the store's catalog with the configured one.
///
/// Invalid entries are logged and skipped; they never abort the sync.
pub async fn sync_from_config(store: &dyn Store, projects: &[ProjectConfig]) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    if projects.is_empty() {
        tracing::info!("no projects in config");
        return Ok(report);
    }

    for project_cfg in projects {
        let project_id = match store.project_by_slug(&project_cfg.slug).await? {
            None => {
                let project = Project {
                    id: None,
                    slug: project_cfg.slug.clone(),
                    name: project_cfg.name.clone(),
                    created_at: Utc::now(),
                };
                let id = store.insert_project(&project).await?;
                report.created += 1;
                tracing::info!("created project: {}", project_cfg.slug);
                id
            }
            Some(existing) => {
                let id = existing.id.context("project row without id")?;
                if existing.name != project_cfg.name {
                    store.update_project_name(id, &project_cfg.name).await?;
                    report.updated += 1;
                    tracing::info!("updated project name: {} -> {}", project_cfg.slug, project_cfg.name);
                }
                id
            }
        };

        sync_networks(store, project_id, &project_cfg.slug, &project_cfg.networks, &mut report)
            .await?;
    }

    Ok(report)
}

async fn sync_networks(
    store: &dyn Store,
    project_id: i64,
    project_slug: &str,
    networks: &[NetworkConfig],
    report: &mut SyncReport,
) -> Result<()> {
    let existing: Vec<Network> = store.networks_of_project(project_id).await?;

    for network_cfg in networks {
        let network_id = match existing.iter().find(|n| n.slug == network_cfg.slug) {
            None => {
                let network = Network {
                    id: None,
                    project_id,
                    slug: network_cfg.slug.clone(),
                    name: network_cfg.name.clone(),
                    chain_id: network_cfg.chain_id.clone(),
                    network_type: network_cfg.network_type,
                    check_interval_seconds: network_cfg.check_interval_seconds,
                    stale_after_seconds: network_cfg.stale_after_seconds,
                    max_height_lag: network_cfg.max_height_lag,
                    created_at: Utc::now(),
                };
                let id = store.insert_network(&network).await?;
                report.created += 1;
                tracing::info!("created network: {}/{}", project_slug, network_cfg.slug);
                id
            }
            Some(current) => {
                let id = current.id.context("network row without id")?;
                let changed = current.name != network_cfg.name
                    || current.chain_id != network_cfg.chain_id
                    || current.network_type != network_cfg.network_type
                    || current.check_interval_seconds != network_cfg.check_interval_seconds
                    || current.stale_after_seconds != network_cfg.stale_after_seconds
                    || current.max_height_lag != network_cfg.max_height_lag;
                if changed {
                    let updated = Network {
                        id: Some(id),
                        project_id,
                        slug: network_cfg.slug.clone(),
                        name: network_cfg.name.clone(),
                        chain_id: network_cfg.chain_id.clone(),
                        network_type: network_cfg.network_type,
                        check_interval_seconds: network_cfg.check_interval_seconds,
                        stale_after_seconds: network_cfg.stale_after_seconds,
                        max_height_lag: network_cfg.max_height_lag,
                        created_at: current.created_at,
                    };
                    store.update_network(&updated).await?;
                    report.updated += 1;
                    tracing::info!("updated network: {}/{}", project_slug, network_cfg.slug);
                }
                id
            }
        };

        sync_endpoints(store, network_id, project_slug, network_cfg, report).await?;
    }

    Ok(())
}

async fn sync_endpoints(
    store: &dyn Store,
    network_id: i64,
    project_slug: &str,
    network_cfg: &NetworkConfig,
    report: &mut SyncReport,
) -> Result<()> {
    let existing: Vec<Endpoint> = store.endpoints_of_network(network_id).await?;
    let mut configured_urls: Vec<&str> = Vec::new();

    for endpoint_cfg in &network_cfg.endpoints {
        if let Err(e) = validate_endpoint_url(&endpoint_cfg.url) {
            tracing::warn!(
                "skipping endpoint {}/{} [{}] {}: {}",
                project_slug,
                network_cfg.slug,
                endpoint_cfg.kind,
                endpoint_cfg.url,
                e
            );
            report.skipped += 1;
            continue;
        }
        configured_urls.push(endpoint_cfg.url.as_str());

        match existing.iter().find(|e| e.url == endpoint_cfg.url) {
            None => {
                let endpoint = Endpoint::new(
                    network_id,
                    endpoint_cfg.name.clone(),
                    endpoint_cfg.kind,
                    endpoint_cfg.url.clone(),
                    endpoint_cfg.enabled,
                );
                store.insert_endpoint(&endpoint).await?;
                report.created += 1;
                tracing::info!(
                    "created endpoint: {}/{} [{}] {}",
                    project_slug,
                    network_cfg.slug,
                    endpoint_cfg.kind,
                    endpoint_cfg.url
                );
            }
            Some(current) => {
                if endpoint_changed(current, endpoint_cfg) {
                    let updated = Endpoint {
                        name: endpoint_cfg.name.clone(),
                        kind: endpoint_cfg.kind,
                        enabled: endpoint_cfg.enabled,
                        ..current.clone()
                    };
                    store.update_endpoint(&updated).await?;
                    report.updated += 1;
                    tracing::info!(
                        "updated endpoint: {}/{} [{}] {}",
                        project_slug,
                        network_cfg.slug,
                        endpoint_cfg.kind,
                        endpoint_cfg.url
                    );
                }
            }
        }
    }

    // endpoints dropped from the config keep their history, they only stop
    // being checked
    for endpoint in &existing {
        if endpoint.enabled && !configured_urls.contains(&endpoint.url.as_str()) {
            let id = endpoint.id.context("endpoint row without id")?;
            store.set_endpoint_enabled(id, false).await?;
            report.disabled += 1;
            tracing::info!(
                "disabling endpoint removed from config: {}/{} [{}] {}",
                project_slug,
                network_cfg.slug,
                endpoint.kind,
                endpoint.url
            );
        }
    }

    Ok(())
}

fn endpoint_changed(current: &Endpoint, config: &EndpointConfig) -> bool {
    current.name != config.name || current.kind != config.kind || current.enabled != config.enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::models::{CheckRecord, EndpointStatus};
    use crate::database::{StoreImpl, initialize_database};
    use crate::monitoring::types::HealthStatus;
    use crate::pool::LibsqlManager;
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Helper to create a migrated on-disk test store
    async fn create_test_store() -> (Arc<StoreImpl>, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let db = libsql::Builder::new_local(&db_path_str).build().await.unwrap();
        let manager = LibsqlManager::new(db);
        let pool: crate::pool::LibsqlPool = deadpool::managed::Pool::builder(manager)
            .config(deadpool::managed::PoolConfig::default())
            .build()
            .unwrap();

        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
        drop(conn);

        (Arc::new(StoreImpl::new_from_pool(pool)), temp_dir)
    }

    fn sample_config(endpoints: &str) -> Config {
        let raw = format!(
            r#"
            [[projects]]
            slug = "cosmos"
            name = "Cosmos Hub"

            [[projects.networks]]
            slug = "cosmoshub-mainnet"
            name = "Cosmos Hub Mainnet"
            chain_id = "cosmoshub-4"
            network_type = "mainnet"

            {endpoints}
            "#
        );
        toml::from_str(&raw).unwrap()
    }

    const TWO_ENDPOINTS: &str = r#"
        [[projects.networks.endpoints]]
        name = "Example RPC"
        kind = "rpc"
        url = "https://rpc.example.com"

        [[projects.networks.endpoints]]
        name = "Example REST"
        kind = "api"
        url = "https://api.example.com"
    "#;

    #[tokio::test]
    async fn sync_twice_with_identical_config_creates_no_duplicates() {
        let (store, _dir) = create_test_store().await;
        let config = sample_config(TWO_ENDPOINTS);

        let first = sync_from_config(store.as_ref(), &config.projects).await.unwrap();
        assert_eq!(first.created, 4, "project + network + two endpoints");
        assert_eq!(store.projects().await.unwrap().len(), 1);

        // attach some history to one endpoint before re-syncing
        let project = store.project_by_slug("cosmos").await.unwrap().unwrap();
        let networks = store.networks_of_project(project.id.unwrap()).await.unwrap();
        let endpoints = store.endpoints_of_network(networks[0].id.unwrap()).await.unwrap();
        assert_eq!(endpoints.len(), 2);

        let endpoint_id = endpoints[0].id.unwrap();
        let now = Utc::now();
        let check = CheckRecord {
            id: None,
            endpoint_id,
            checked_at: now,
            success: true,
            http_status: Some(200),
            latency_ms: 42,
            block_height: Some(1000),
            block_time: Some(now),
            error_kind: None,
            error_detail: None,
        };
        let status = EndpointStatus {
            endpoint_id,
            last_checked: now,
            status: HealthStatus::Ok,
            latency_ms: 42,
            http_status: Some(200),
            block_height: Some(1000),
            block_delay: Some(0),
            is_stale: false,
            error_detail: None,
        };
        store.commit_check(&check, &status).await.unwrap();

        let second = sync_from_config(store.as_ref(), &config.projects).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.disabled, 0);

        let endpoints_after = store.endpoints_of_network(networks[0].id.unwrap()).await.unwrap();
        assert_eq!(endpoints_after.len(), 2, "no duplicate endpoints");

        let history = store
            .checks_between(endpoints[0].uuid, now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 1, "existing check history survives re-sync");
    }

    #[tokio::test]
    async fn removed_endpoint_is_disabled_not_deleted() {
        let (store, _dir) = create_test_store().await;

        let full = sample_config(TWO_ENDPOINTS);
        sync_from_config(store.as_ref(), &full.projects).await.unwrap();

        let only_rpc = sample_config(
            r#"
            [[projects.networks.endpoints]]
            name = "Example RPC"
            kind = "rpc"
            url = "https://rpc.example.com"
            "#,
        );
        let report = sync_from_config(store.as_ref(), &only_rpc.projects).await.unwrap();
        assert_eq!(report.disabled, 1);

        let project = store.project_by_slug("cosmos").await.unwrap().unwrap();
        let networks = store.networks_of_project(project.id.unwrap()).await.unwrap();
        let endpoints = store.endpoints_of_network(networks[0].id.unwrap()).await.unwrap();

        assert_eq!(endpoints.len(), 2, "row is kept");
        let rest = endpoints.iter().find(|e| e.url == "https://api.example.com").unwrap();
        assert!(!rest.enabled);
        let rpc = endpoints.iter().find(|e| e.url == "https://rpc.example.com").unwrap();
        assert!(rpc.enabled);
    }

    #[tokio::test]
    async fn renamed_endpoint_is_updated_in_place() {
        let (store, _dir) = create_test_store().await;

        let original = sample_config(TWO_ENDPOINTS);
        sync_from_config(store.as_ref(), &original.projects).await.unwrap();

        let renamed = sample_config(
            r#"
            [[projects.networks.endpoints]]
            name = "Renamed RPC"
            kind = "rpc"
            url = "https://rpc.example.com"

            [[projects.networks.endpoints]]
            name = "Example REST"
            kind = "api"
            url = "https://api.example.com"
            "#,
        );
        let report = sync_from_config(store.as_ref(), &renamed.projects).await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 1);

        let project = store.project_by_slug("cosmos").await.unwrap().unwrap();
        let networks = store.networks_of_project(project.id.unwrap()).await.unwrap();
        let endpoints = store.endpoints_of_network(networks[0].id.unwrap()).await.unwrap();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().any(|e| e.name == "Renamed RPC"));
    }

    #[tokio::test]
    async fn invalid_endpoint_url_is_skipped() {
        let (store, _dir) = create_test_store().await;

        let config = sample_config(
            r#"
            [[projects.networks.endpoints]]
            name = "Bad"
            kind = "rpc"
            url = "ftp://rpc.example.com"

            [[projects.networks.endpoints]]
            name = "Good"
            kind = "rpc"
            url = "https://rpc.example.com"
            "#,
        );
        let report = sync_from_config(store.as_ref(), &config.projects).await.unwrap();
        assert_eq!(report.skipped, 1);

        let project = store.project_by_slug("cosmos").await.unwrap().unwrap();
        let networks = store.networks_of_project(project.id.unwrap()).await.unwrap();
        let endpoints = store.endpoints_of_network(networks[0].id.unwrap()).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name, "Good");
    }

    #[test]
    fn url_validation_requires_http_scheme() {
        assert!(validate_endpoint_url("https://rpc.example.com").is_ok());
        assert!(validate_endpoint_url("http://rpc.example.com:26657").is_ok());
        assert!(validate_endpoint_url("ftp://rpc.example.com").is_err());
        assert!(validate_endpoint_url("not a url").is_err());
    }
}
