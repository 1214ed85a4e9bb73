use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol flavour of an endpoint, selects the probe request and parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Rpc,
    Api,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Rpc => "rpc",
            EndpointKind::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rpc" => Some(EndpointKind::Rpc),
            "api" => Some(EndpointKind::Api),
            _ => None,
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health classification surfaced to status consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
            HealthStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "ok" => HealthStatus::Ok,
            "degraded" => HealthStatus::Degraded,
            "down" => HealthStatus::Down,
            _ => HealthStatus::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy for checks
///
/// Probe failures carry one of these; `PersistenceError` is produced only by
/// the commit path when the store rejects a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionError,
    HttpError,
    ParseError,
    ChainMismatch,
    PersistenceError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::HttpError => "http_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ChainMismatch => "chain_mismatch",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "timeout" => ErrorKind::Timeout,
            "connection_error" => ErrorKind::ConnectionError,
            "http_error" => ErrorKind::HttpError,
            "parse_error" => ErrorKind::ParseError,
            "chain_mismatch" => ErrorKind::ChainMismatch,
            "persistence_error" => ErrorKind::PersistenceError,
            _ => ErrorKind::UnknownError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified probe failure with a human-readable detail
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ProbeError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ProbeError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let mut detail = detail.into();
        // remote errors can embed whole response bodies, keep rows bounded
        detail.truncate(400);
        Self { kind, detail }
    }
}

/// Normalized result of one probe attempt
///
/// Every failure mode of the prober collapses into one of these; the caller
/// never sees an Err from a probe.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub block_height: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub error: Option<ProbeError>,
}

impl Outcome {
    /// Successful probe with an HTTP status
    pub fn success(latency_ms: u64, http_status: u16) -> Self {
        Self {
            success: true,
            http_status: Some(http_status),
            latency_ms,
            block_height: None,
            block_time: None,
            error: None,
        }
    }

    /// Failed probe with a classified error
    pub fn failure(kind: ErrorKind, detail: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            http_status: None,
            latency_ms,
            block_height: None,
            block_time: None,
            error: Some(ProbeError::new(kind, detail)),
        }
    }

    /// Attach the HTTP status of the response that produced this outcome
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Attach observed chain head data (present on some failures too, a
    /// chain-id mismatch still reports the remote height)
    pub fn with_block(mut self, height: Option<u64>, time: Option<DateTime<Utc>>) -> Self {
        self.block_height = height;
        self.block_time = time;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
