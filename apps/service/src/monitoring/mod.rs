/// Monitoring engine module - the periodic checking worker
///
/// This module is responsible for:
/// - Probing RPC/REST endpoints and normalizing responses
/// - Scheduling check cycles with bounded concurrency
/// - Reducing outcomes to the durable per-endpoint status
pub mod aggregator;
pub mod parse;
pub mod prober;
pub mod scheduler;
pub mod types;

pub use aggregator::StatusAggregator;
pub use prober::HttpProber;
pub use scheduler::{CheckScheduler, SchedulerConfig};
