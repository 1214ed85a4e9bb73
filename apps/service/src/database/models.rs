use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::types::{EndpointKind, ErrorKind, HealthStatus};

/// Network flavour, mirrors the catalog's mainnet/testnet split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Other,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "mainnet" => NetworkType::Mainnet,
            "testnet" => NetworkType::Testnet,
            _ => NetworkType::Other,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project model - a protocol/operator grouping of networks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Option<i64>,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Network model - one chain of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: Option<i64>,
    pub project_id: i64,
    pub slug: String,
    pub name: String,
    pub chain_id: String,
    pub network_type: NetworkType,
    /// Per-network overrides; worker defaults apply when None
    pub check_interval_seconds: Option<u64>,
    pub stale_after_seconds: Option<u64>,
    pub max_height_lag: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Endpoint model - one probed RPC or REST URL of a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub network_id: i64,
    pub name: String,
    pub kind: EndpointKind,
    pub url: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(network_id: i64, name: String, kind: EndpointKind, url: String, enabled: bool) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            network_id,
            name,
            kind,
            url,
            enabled,
            created_at: Utc::now(),
        }
    }
}

/// Check model - immutable record of one probe attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: Option<i64>,
    pub endpoint_id: i64,
    pub checked_at: DateTime<Utc>,
    pub success: bool,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub block_height: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

/// EndpointStatus model - the single mutable, always-current row per endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub endpoint_id: i64,
    pub last_checked: DateTime<Utc>,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub http_status: Option<u16>,
    pub block_height: Option<u64>,
    /// Height lag behind the freshest sibling on the same network; None when
    /// this endpoint reported no height
    pub block_delay: Option<u64>,
    pub is_stale: bool,
    pub error_detail: Option<String>,
}

/// Endpoint joined with its network context, as selected for one check cycle
#[derive(Debug, Clone)]
pub struct DueEndpoint {
    pub endpoint_id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub kind: EndpointKind,
    pub url: String,
    pub network_id: i64,
    pub network_slug: String,
    pub chain_id: String,
    pub stale_after_seconds: Option<u64>,
    pub max_height_lag: Option<u64>,
}

/// Convert a UTC timestamp to unix seconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored unix seconds back to a UTC timestamp
pub fn i64_to_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
