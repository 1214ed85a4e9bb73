use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::types::{ErrorKind, HealthStatus, Outcome};
use crate::database::Store;
use crate::database::models::{CheckRecord, DueEndpoint, EndpointStatus};

/// Fallback freshness threshold when a network configures none
pub const DEFAULT_STALE_AFTER_SECONDS: u64 = 60;
/// Fallback height-lag threshold when a network configures none
pub const DEFAULT_MAX_HEIGHT_LAG: u64 = 10;

/// Status aggregator - reduces probe outcomes to the durable current status
///
/// All status writes flow through `apply`; calls for the same endpoint are
/// serialized through a per-endpoint lock, calls for different endpoints run
/// concurrently.
pub struct StatusAggregator {
    store: Arc<dyn Store>,
    default_stale_after_seconds: u64,
    default_max_height_lag: u64,
    locks: std::sync::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn Store>, stale_after_seconds: u64, max_height_lag: u64) -> Self {
        Self {
            store,
            default_stale_after_seconds: stale_after_seconds,
            default_max_height_lag: max_height_lag,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Lock guarding writes for one endpoint. The map only ever holds one
    /// entry per catalog endpoint, so it stays small.
    fn lock_for(&self, endpoint_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("aggregator lock map poisoned");
        locks.entry(endpoint_id).or_default().clone()
    }

    /// Classify one outcome and commit it: one immutable Check row plus the
    /// upserted EndpointStatus, in a single transaction. Returns the status
    /// row as written.
    pub async fn apply(
        &self,
        endpoint: &DueEndpoint,
        outcome: &Outcome,
        block_delay: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<EndpointStatus> {
        let stale_after = endpoint.stale_after_seconds.unwrap_or(self.default_stale_after_seconds);
        let max_lag = endpoint.max_height_lag.unwrap_or(self.default_max_height_lag);

        let is_stale = is_stale(outcome, now, stale_after);
        let status = classify(outcome, is_stale, block_delay, max_lag);
        let error_detail = outcome.error.as_ref().map(|e| e.detail.clone());

        let check = CheckRecord {
            id: None,
            endpoint_id: endpoint.endpoint_id,
            checked_at: now,
            success: outcome.success,
            http_status: outcome.http_status,
            latency_ms: outcome.latency_ms,
            block_height: outcome.block_height,
            block_time: outcome.block_time,
            error_kind: outcome.error_kind(),
            error_detail: error_detail.clone(),
        };

        let row = EndpointStatus {
            endpoint_id: endpoint.endpoint_id,
            last_checked: now,
            status,
            latency_ms: outcome.latency_ms,
            http_status: outcome.http_status,
            block_height: outcome.block_height,
            block_delay,
            is_stale,
            error_detail,
        };

        let lock = self.lock_for(endpoint.endpoint_id);
        let _guard = lock.lock().await;
        self.store.commit_check(&check, &row).await?;
        Ok(row)
    }
}

/// An endpoint is stale when the probe failed, when it reported no block
/// time, or when the reported block time is older than the threshold.
pub fn is_stale(outcome: &Outcome, now: DateTime<Utc>, stale_after_seconds: u64) -> bool {
    if !outcome.success {
        return true;
    }
    match outcome.block_time {
        Some(block_time) => {
            now.signed_duration_since(block_time) > Duration::seconds(stale_after_seconds as i64)
        }
        None => true,
    }
}

/// Reduce an outcome to the surfaced classification.
///
/// Parse failures and height-less successes mean we cannot judge the chain
/// head at all, so they land on `unknown` rather than `down`/`degraded`.
pub fn classify(
    outcome: &Outcome,
    is_stale: bool,
    block_delay: Option<u64>,
    max_height_lag: u64,
) -> HealthStatus {
    if outcome.success {
        if outcome.block_height.is_none() {
            return HealthStatus::Unknown;
        }
        let lagging = block_delay.is_some_and(|delay| delay > max_height_lag);
        if is_stale || lagging { HealthStatus::Degraded } else { HealthStatus::Ok }
    } else {
        match outcome.error_kind() {
            Some(ErrorKind::ParseError) => HealthStatus::Unknown,
            _ => HealthStatus::Down,
        }
    }
}

/// Height lag per endpoint relative to the freshest sibling on the same
/// network, computed over one cycle's outcomes. Endpoints without a height
/// stay absent (delay undefined).
pub fn sibling_delays(results: &[(DueEndpoint, Outcome)]) -> HashMap<i64, u64> {
    let mut max_height: HashMap<i64, u64> = HashMap::new();
    for (endpoint, outcome) in results {
        if let Some(height) = outcome.block_height {
            let entry = max_height.entry(endpoint.network_id).or_insert(height);
            if height > *entry {
                *entry = height;
            }
        }
    }

    let mut delays = HashMap::new();
    for (endpoint, outcome) in results {
        if let Some(height) = outcome.block_height {
            if let Some(max) = max_height.get(&endpoint.network_id) {
                delays.insert(endpoint.endpoint_id, max - height);
            }
        }
    }
    delays
}
