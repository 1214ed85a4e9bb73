use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::aggregator::{StatusAggregator, sibling_delays};
use super::prober::{Probe, ProbeTarget};
use super::types::{ErrorKind, Outcome};
use crate::database::Store;
use crate::database::models::DueEndpoint;

/// Worker configuration for the check scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock interval between cycles
    pub check_interval: Duration,
    /// Maximum endpoints selected per cycle
    pub batch_limit: usize,
    /// Per-probe HTTP timeout
    pub request_timeout: Duration,
    /// Concurrent probe ceiling
    pub max_concurrent_checks: usize,
    /// Bounded retries when persisting one endpoint's result
    pub persist_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            batch_limit: 300,
            request_timeout: Duration::from_secs(5),
            max_concurrent_checks: 16,
            persist_retries: 3,
        }
    }
}

/// Phase of the currently running cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Selecting,
    Dispatching,
    Collecting,
    Committing,
}

/// Summary of one completed cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Tick arrived while the previous cycle was still running
    pub skipped: bool,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub persist_failures: usize,
    pub elapsed_ms: u64,
}

impl CycleReport {
    fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }
}

/// Check scheduler - drives periodic probe cycles over the endpoint catalog
///
/// One cycle walks Selecting -> Dispatching -> Collecting -> Committing and
/// back to Idle. Probes fan out under a semaphore; results are committed only
/// after collection so sibling heights for the block-delay computation are
/// complete.
pub struct CheckScheduler {
    store: Arc<dyn Store>,
    prober: Arc<dyn Probe>,
    aggregator: Arc<StatusAggregator>,
    config: SchedulerConfig,
    cycle_gate: tokio::sync::Mutex<()>,
    phase: std::sync::Mutex<CyclePhase>,
}

impl CheckScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        prober: Arc<dyn Probe>,
        aggregator: Arc<StatusAggregator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            prober,
            aggregator,
            config,
            cycle_gate: tokio::sync::Mutex::new(()),
            phase: std::sync::Mutex::new(CyclePhase::Idle),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().expect("scheduler phase lock poisoned")
    }

    fn enter(&self, phase: CyclePhase) {
        tracing::debug!("cycle phase: {:?}", phase);
        *self.phase.lock().expect("scheduler phase lock poisoned") = phase;
    }

    /// Run one check cycle. Returns a skipped report when a previous cycle is
    /// still in flight; two cycles never run concurrently.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let _gate = match self.cycle_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("previous check cycle still running, skipping this tick");
                return Ok(CycleReport::skipped());
            }
        };

        let result = self.cycle(now).await;
        self.enter(CyclePhase::Idle);
        result
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let started = Instant::now();

        self.enter(CyclePhase::Selecting);
        let due = self
            .store
            .due_endpoints(now, self.config.check_interval.as_secs(), self.config.batch_limit)
            .await?;

        if due.is_empty() {
            tracing::info!("no enabled endpoints due for checking");
            return Ok(CycleReport::default());
        }
        let selected = due.len();
        tracing::info!("checking {} endpoints", selected);

        self.enter(CyclePhase::Dispatching);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks.max(1)));
        let mut probes: JoinSet<(usize, Outcome)> = JoinSet::new();

        for (index, endpoint) in due.iter().enumerate() {
            let semaphore = semaphore.clone();
            let prober = self.prober.clone();
            let target = ProbeTarget {
                url: endpoint.url.clone(),
                kind: endpoint.kind,
                expected_chain_id: Some(endpoint.chain_id.clone()).filter(|c| !c.is_empty()),
            };

            probes.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Outcome::failure(ErrorKind::UnknownError, "probe slot unavailable", 0),
                        );
                    }
                };
                (index, prober.probe(&target).await)
            });
        }

        self.enter(CyclePhase::Collecting);
        let deadline = tokio::time::Instant::now() + self.cycle_budget(selected);
        let mut outcomes: Vec<Option<Outcome>> = vec![None; selected];

        loop {
            match tokio::time::timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => outcomes[index] = Some(outcome),
                Ok(Some(Err(join_error))) => {
                    tracing::warn!("probe task failed to complete: {join_error}");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "cycle deadline reached, aborting {} in-flight probes",
                        probes.len()
                    );
                    probes.abort_all();
                    while probes.join_next().await.is_some() {}
                    break;
                }
            }
        }

        self.enter(CyclePhase::Committing);
        let results: Vec<(DueEndpoint, Outcome)> = due
            .into_iter()
            .zip(outcomes)
            .map(|(endpoint, outcome)| {
                // aborted or crashed probes still produce exactly one check
                let outcome = outcome.unwrap_or_else(|| {
                    Outcome::failure(
                        ErrorKind::Timeout,
                        "probe did not complete within the cycle deadline",
                        self.config.request_timeout.as_millis() as u64,
                    )
                });
                (endpoint, outcome)
            })
            .collect();

        let delays = sibling_delays(&results);

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut persist_failures = 0usize;

        for (endpoint, outcome) in &results {
            if outcome.success {
                succeeded += 1;
            } else {
                failed += 1;
            }
            let delay = delays.get(&endpoint.endpoint_id).copied();

            let mut attempt = 0;
            loop {
                match self.aggregator.apply(endpoint, outcome, delay, now).await {
                    Ok(status) => {
                        tracing::info!(
                            "endpoint {} ({}, {}) -> {} http={:?} height={:?} delay={:?} stale={}",
                            endpoint.name,
                            endpoint.kind,
                            endpoint.url,
                            status.status,
                            outcome.http_status,
                            outcome.block_height,
                            delay,
                            status.is_stale,
                        );
                        break;
                    }
                    Err(e) if attempt < self.config.persist_retries => {
                        attempt += 1;
                        tracing::warn!(
                            "persisting check for {} failed (attempt {}): {:#}",
                            endpoint.url,
                            attempt,
                            e
                        );
                    }
                    Err(e) => {
                        tracing::error!("giving up on persisting check for {}: {:#}", endpoint.url, e);
                        persist_failures += 1;
                        break;
                    }
                }
            }
        }

        Ok(CycleReport {
            skipped: false,
            selected,
            succeeded,
            failed,
            persist_failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Upper bound for one cycle. REST probes may issue up to three
    /// sequential requests, so every wave gets three request timeouts, plus
    /// one more for scheduling overhead.
    fn cycle_budget(&self, selected: usize) -> Duration {
        let waves = selected.div_ceil(self.config.max_concurrent_checks.max(1)) as u32;
        self.config.request_timeout * (3 * waves + 1)
    }

    /// Perpetual worker loop. Ticks at the configured interval, skips ticks
    /// that land while a cycle is still running, and survives store outages
    /// by reporting and waiting for the next tick.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "worker started, interval={}s, timeout={:.1}s, batch_limit={}, concurrency={}",
            self.config.check_interval.as_secs(),
            self.config.request_timeout.as_secs_f64(),
            self.config.batch_limit,
            self.config.max_concurrent_checks,
        );

        loop {
            ticker.tick().await;
            match self.run_cycle(Utc::now()).await {
                Ok(report) if report.skipped => {}
                Ok(report) => tracing::info!(
                    "check cycle done: {} selected, {} up, {} down, {} persist failures, {}ms",
                    report.selected,
                    report.succeeded,
                    report.failed,
                    report.persist_failures,
                    report.elapsed_ms,
                ),
                Err(e) => tracing::error!("check cycle failed: {:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{
        CheckRecord, Endpoint, EndpointStatus, Network, Project,
    };
    use crate::monitoring::aggregator::{DEFAULT_MAX_HEIGHT_LAG, DEFAULT_STALE_AFTER_SECONDS};
    use crate::monitoring::types::{EndpointKind, HealthStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use uuid::Uuid;

    /// Probe stub returning canned outcomes per URL, with optional delays
    #[derive(Default)]
    struct StubProbe {
        outcomes: HashMap<String, Outcome>,
        delays: HashMap<String, Duration>,
    }

    #[async_trait]
    impl Probe for StubProbe {
        async fn probe(&self, target: &ProbeTarget) -> Outcome {
            if let Some(delay) = self.delays.get(&target.url) {
                tokio::time::sleep(*delay).await;
            }
            self.outcomes
                .get(&target.url)
                .cloned()
                .unwrap_or_else(|| Outcome::failure(ErrorKind::UnknownError, "no stubbed outcome", 0))
        }
    }

    /// In-memory store mirroring the SQL upsert's timestamp guard
    #[derive(Default)]
    struct MemStore {
        due: std::sync::Mutex<Vec<DueEndpoint>>,
        checks: std::sync::Mutex<Vec<CheckRecord>>,
        statuses: std::sync::Mutex<HashMap<i64, EndpointStatus>>,
    }

    impl MemStore {
        fn with_due(due: Vec<DueEndpoint>) -> Self {
            Self { due: std::sync::Mutex::new(due), ..Self::default() }
        }

        fn check_count(&self) -> usize {
            self.checks.lock().unwrap().len()
        }

        fn status(&self, endpoint_id: i64) -> Option<EndpointStatus> {
            self.statuses.lock().unwrap().get(&endpoint_id).cloned()
        }
    }

    #[async_trait]
    impl Store for MemStore {
        async fn project_by_slug(&self, _slug: &str) -> Result<Option<Project>> {
            unimplemented!("not used by scheduler tests")
        }
        async fn insert_project(&self, _project: &Project) -> Result<i64> {
            unimplemented!("not used by scheduler tests")
        }
        async fn update_project_name(&self, _project_id: i64, _name: &str) -> Result<()> {
            unimplemented!("not used by scheduler tests")
        }
        async fn networks_of_project(&self, _project_id: i64) -> Result<Vec<Network>> {
            unimplemented!("not used by scheduler tests")
        }
        async fn insert_network(&self, _network: &Network) -> Result<i64> {
            unimplemented!("not used by scheduler tests")
        }
        async fn update_network(&self, _network: &Network) -> Result<()> {
            unimplemented!("not used by scheduler tests")
        }
        async fn endpoints_of_network(&self, _network_id: i64) -> Result<Vec<Endpoint>> {
            unimplemented!("not used by scheduler tests")
        }
        async fn insert_endpoint(&self, _endpoint: &Endpoint) -> Result<i64> {
            unimplemented!("not used by scheduler tests")
        }
        async fn update_endpoint(&self, _endpoint: &Endpoint) -> Result<()> {
            unimplemented!("not used by scheduler tests")
        }
        async fn set_endpoint_enabled(&self, _endpoint_id: i64, _enabled: bool) -> Result<()> {
            unimplemented!("not used by scheduler tests")
        }

        async fn due_endpoints(
            &self,
            _now: DateTime<Utc>,
            _default_interval_seconds: u64,
            limit: usize,
        ) -> Result<Vec<DueEndpoint>> {
            let due = self.due.lock().unwrap();
            Ok(due.iter().take(limit).cloned().collect())
        }

        async fn commit_check(&self, check: &CheckRecord, status: &EndpointStatus) -> Result<()> {
            self.checks.lock().unwrap().push(check.clone());
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get(&status.endpoint_id) {
                Some(existing) if existing.last_checked > status.last_checked => {}
                _ => {
                    statuses.insert(status.endpoint_id, status.clone());
                }
            }
            Ok(())
        }

        async fn projects(&self) -> Result<Vec<Project>> {
            unimplemented!("not used by scheduler tests")
        }
        async fn endpoint_statuses(
            &self,
            _project_slug: &str,
            _network_slug: &str,
        ) -> Result<Vec<(Endpoint, Option<EndpointStatus>)>> {
            unimplemented!("not used by scheduler tests")
        }
        async fn status_of(&self, endpoint_id: i64) -> Result<Option<EndpointStatus>> {
            Ok(self.status(endpoint_id))
        }
        async fn checks_between(
            &self,
            _endpoint_uuid: Uuid,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<CheckRecord>> {
            unimplemented!("not used by scheduler tests")
        }
    }

    fn due(endpoint_id: i64, network_id: i64, url: &str) -> DueEndpoint {
        DueEndpoint {
            endpoint_id,
            uuid: Uuid::new_v4(),
            name: format!("ep-{endpoint_id}"),
            kind: EndpointKind::Rpc,
            url: url.to_string(),
            network_id,
            network_slug: format!("net-{network_id}"),
            chain_id: "testchain-1".to_string(),
            stale_after_seconds: None,
            max_height_lag: None,
        }
    }

    fn success_at_height(height: u64) -> Outcome {
        Outcome::success(40, 200).with_block(Some(height), Some(Utc::now()))
    }

    fn scheduler(
        store: Arc<MemStore>,
        probe: StubProbe,
        config: SchedulerConfig,
    ) -> CheckScheduler {
        let aggregator = Arc::new(StatusAggregator::new(
            store.clone(),
            DEFAULT_STALE_AFTER_SECONDS,
            DEFAULT_MAX_HEIGHT_LAG,
        ));
        CheckScheduler::new(store, Arc::new(probe), aggregator, config)
    }

    #[tokio::test]
    async fn one_check_per_selected_endpoint() {
        let store = Arc::new(MemStore::with_due(vec![
            due(1, 10, "https://a.example.com"),
            due(2, 10, "https://b.example.com"),
            due(3, 10, "https://c.example.com"),
        ]));
        let mut probe = StubProbe::default();
        probe.outcomes.insert("https://a.example.com".to_string(), success_at_height(1000));
        probe.outcomes.insert(
            "https://b.example.com".to_string(),
            Outcome::failure(ErrorKind::Timeout, "request timed out", 5000),
        );
        probe.outcomes.insert(
            "https://c.example.com".to_string(),
            Outcome::failure(ErrorKind::ParseError, "invalid json", 30).with_http_status(200),
        );

        let scheduler = scheduler(store.clone(), probe, SchedulerConfig::default());
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.selected, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(store.check_count(), 3);

        assert_eq!(store.status(1).unwrap().status, HealthStatus::Ok);
        assert_eq!(store.status(2).unwrap().status, HealthStatus::Down);
        assert_eq!(store.status(3).unwrap().status, HealthStatus::Unknown);
        assert_eq!(scheduler.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn sibling_lag_degrades_the_slower_endpoint() {
        let store = Arc::new(MemStore::with_due(vec![
            due(1, 10, "https://fast.example.com"),
            due(2, 10, "https://slow.example.com"),
        ]));
        let mut probe = StubProbe::default();
        probe.outcomes.insert("https://fast.example.com".to_string(), success_at_height(1000));
        probe.outcomes.insert("https://slow.example.com".to_string(), success_at_height(950));

        let scheduler = scheduler(store.clone(), probe, SchedulerConfig::default());
        scheduler.run_cycle(Utc::now()).await.unwrap();

        let fast = store.status(1).unwrap();
        let slow = store.status(2).unwrap();
        assert_eq!(fast.status, HealthStatus::Ok);
        assert_eq!(fast.block_delay, Some(0));
        // 50 blocks behind, default threshold is 10
        assert_eq!(slow.status, HealthStatus::Degraded);
        assert_eq!(slow.block_delay, Some(50));
    }

    #[tokio::test]
    async fn slow_probe_does_not_delay_siblings() {
        let store = Arc::new(MemStore::with_due(vec![
            due(1, 10, "https://slow.example.com"),
            due(2, 10, "https://a.example.com"),
            due(3, 10, "https://b.example.com"),
            due(4, 10, "https://c.example.com"),
        ]));
        let mut probe = StubProbe::default();
        probe.delays.insert("https://slow.example.com".to_string(), Duration::from_millis(400));
        for url in ["https://slow.example.com", "https://a.example.com", "https://b.example.com", "https://c.example.com"] {
            probe.outcomes.insert(url.to_string(), success_at_height(1000));
        }

        let config = SchedulerConfig {
            max_concurrent_checks: 4,
            request_timeout: Duration::from_secs(1),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(store.clone(), probe, config);

        let started = Instant::now();
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.selected, 4);
        assert_eq!(store.check_count(), 4);
        // the cycle is bounded by the one slow probe, not the sum of all four
        assert!(elapsed < Duration::from_millis(800), "cycle took {elapsed:?}");
    }

    #[tokio::test]
    async fn aborted_probes_still_produce_a_timeout_check() {
        let store = Arc::new(MemStore::with_due(vec![due(1, 10, "https://hang.example.com")]));
        let mut probe = StubProbe::default();
        // hangs far past the cycle budget of (1 wave + 1) * 100ms
        probe.delays.insert("https://hang.example.com".to_string(), Duration::from_secs(30));
        probe.outcomes.insert("https://hang.example.com".to_string(), success_at_height(1000));

        let config = SchedulerConfig {
            request_timeout: Duration::from_millis(100),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(store.clone(), probe, config);
        let report = scheduler.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.selected, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.check_count(), 1);
        let check = store.checks.lock().unwrap()[0].clone();
        assert_eq!(check.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(store.status(1).unwrap().status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn concurrent_tick_is_skipped() {
        let store = Arc::new(MemStore::with_due(vec![due(1, 10, "https://slow.example.com")]));
        let mut probe = StubProbe::default();
        probe.delays.insert("https://slow.example.com".to_string(), Duration::from_millis(300));
        probe.outcomes.insert("https://slow.example.com".to_string(), success_at_height(1000));

        let scheduler = Arc::new(scheduler(store.clone(), probe, SchedulerConfig::default()));

        let background = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_cycle(Utc::now()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert!(report.skipped);

        let first = background.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(first.selected, 1);
    }

    #[tokio::test]
    async fn aggregator_apply_is_idempotent_per_timestamp() {
        let store = Arc::new(MemStore::default());
        let aggregator = StatusAggregator::new(
            store.clone(),
            DEFAULT_STALE_AFTER_SECONDS,
            DEFAULT_MAX_HEIGHT_LAG,
        );

        let endpoint = due(1, 10, "https://a.example.com");
        let outcome = success_at_height(1000);
        let now = Utc::now();

        let first = aggregator.apply(&endpoint, &outcome, Some(0), now).await.unwrap();
        let second = aggregator.apply(&endpoint, &outcome, Some(0), now).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.statuses.lock().unwrap().len(), 1);
        assert_eq!(store.status(1).unwrap(), first);
    }

    #[tokio::test]
    async fn stale_result_does_not_overwrite_newer_status() {
        let store = Arc::new(MemStore::default());
        let aggregator = StatusAggregator::new(
            store.clone(),
            DEFAULT_STALE_AFTER_SECONDS,
            DEFAULT_MAX_HEIGHT_LAG,
        );

        let endpoint = due(1, 10, "https://a.example.com");
        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(60);

        aggregator.apply(&endpoint, &success_at_height(1000), Some(0), newer).await.unwrap();
        aggregator
            .apply(
                &endpoint,
                &Outcome::failure(ErrorKind::Timeout, "request timed out", 5000),
                None,
                older,
            )
            .await
            .unwrap();

        let status = store.status(1).unwrap();
        assert_eq!(status.last_checked, newer);
        assert_eq!(status.status, HealthStatus::Ok);
        assert_eq!(status.block_height, Some(1000));
    }
}
