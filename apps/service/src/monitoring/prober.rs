use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};

use super::parse::{self, BlockInfo};
use super::types::{EndpointKind, ErrorKind, Outcome, ProbeError};

/// Everything the prober needs to know about one endpoint
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub url: String,
    pub kind: EndpointKind,
    pub expected_chain_id: Option<String>,
}

/// Probe trait so the scheduler can be driven by a stub in tests
#[async_trait]
pub trait Probe: Send + Sync {
    /// Perform one probe. Never fails past this boundary: every error mode
    /// is folded into the returned `Outcome`.
    async fn probe(&self, target: &ProbeTarget) -> Outcome;
}

/// HTTP prober for RPC and REST endpoints
pub struct HttpProber {
    client: reqwest::Client,
}

/// REST paths tried in order: current Cosmos SDK, then the pre-0.47 legacy one
const REST_BLOCK_PATHS: [&str; 2] = ["/cosmos/base/tendermint/v1beta1/blocks/latest", "/blocks/latest"];

enum FetchError {
    /// Never got a usable response
    Transport(ProbeError),
    /// Response arrived with a non-2xx status
    Status(u16),
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }

    /// One GET, 2xx enforced, body fully read
    async fn fetch(&self, url: &str) -> std::result::Result<(u16, Vec<u8>), FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(transport_error(&e)))?;

        let status = response.status().as_u16();
        if !(200..=299).contains(&status) {
            return Err(FetchError::Status(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(transport_error(&e)))?;

        Ok((status, body.to_vec()))
    }

    /// RPC probe: GET {url}/status, chain head under result.sync_info
    async fn probe_rpc(&self, target: &ProbeTarget) -> Outcome {
        let start = Instant::now();
        let url = format!("{}/status", target.url.trim_end_matches('/'));

        let (status, body) = match self.fetch(&url).await {
            Ok(ok) => ok,
            Err(e) => return fetch_failure(e, elapsed_ms(&start)),
        };
        let latency_ms = elapsed_ms(&start);

        match parse::parse_rpc_status(&body) {
            Ok(info) => classify_response(target, status, latency_ms, info),
            Err(e) => Outcome::failure(e.kind, e.detail, latency_ms).with_http_status(status),
        }
    }

    /// REST probe: latest-block paths in order, then a bare liveness GET when
    /// both are unreachable. A response that arrives (any status) is final,
    /// only transport failures move on to the next attempt.
    async fn probe_api(&self, target: &ProbeTarget) -> Outcome {
        let start = Instant::now();
        let base = target.url.trim_end_matches('/');
        let mut transport_errors: Vec<ProbeError> = Vec::new();

        for path in REST_BLOCK_PATHS {
            let url = format!("{base}{path}");
            match self.fetch(&url).await {
                Ok((status, body)) => {
                    let latency_ms = elapsed_ms(&start);
                    return match parse::parse_rest_block(&body) {
                        Ok(info) => classify_response(target, status, latency_ms, info),
                        Err(e) => Outcome::failure(e.kind, e.detail, latency_ms).with_http_status(status),
                    };
                }
                Err(FetchError::Status(code)) => {
                    return Outcome::failure(
                        ErrorKind::HttpError,
                        format!("http status {code}"),
                        elapsed_ms(&start),
                    )
                    .with_http_status(code);
                }
                Err(FetchError::Transport(e)) => transport_errors.push(e),
            }
        }

        match self.fetch(base).await {
            // alive but no block data, classification degrades to unknown
            Ok((status, _body)) => Outcome::success(elapsed_ms(&start), status),
            Err(FetchError::Status(code)) => Outcome::failure(
                ErrorKind::HttpError,
                format!("http status {code}"),
                elapsed_ms(&start),
            )
            .with_http_status(code),
            Err(FetchError::Transport(e)) => {
                transport_errors.push(e);
                let best = most_informative(transport_errors);
                Outcome::failure(best.kind, best.detail, elapsed_ms(&start))
            }
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, target: &ProbeTarget) -> Outcome {
        match target.kind {
            EndpointKind::Rpc => self.probe_rpc(target).await,
            EndpointKind::Api => self.probe_api(target).await,
        }
    }
}

fn elapsed_ms(start: &Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn transport_error(e: &reqwest::Error) -> ProbeError {
    let kind = if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_connect() {
        ErrorKind::ConnectionError
    } else {
        ErrorKind::UnknownError
    };
    ProbeError::new(kind, e.to_string())
}

fn fetch_failure(e: FetchError, latency_ms: u64) -> Outcome {
    match e {
        FetchError::Transport(e) => Outcome::failure(e.kind, e.detail, latency_ms),
        FetchError::Status(code) => {
            Outcome::failure(ErrorKind::HttpError, format!("http status {code}"), latency_ms)
                .with_http_status(code)
        }
    }
}

/// Turn a parsed 2xx response into the final outcome: verify the chain id,
/// require a valid block time, keep whatever head data was observed.
fn classify_response(target: &ProbeTarget, http_status: u16, latency_ms: u64, info: BlockInfo) -> Outcome {
    if let Err(e) = parse::verify_chain_id(target.expected_chain_id.as_deref(), info.chain_id.as_deref()) {
        return Outcome::failure(e.kind, e.detail, latency_ms)
            .with_http_status(http_status)
            .with_block(info.height, info.time);
    }

    if info.time.is_none() {
        return Outcome::failure(ErrorKind::ParseError, "missing or invalid block time", latency_ms)
            .with_http_status(http_status)
            .with_block(info.height, None);
    }

    Outcome::success(latency_ms, http_status).with_block(info.height, info.time)
}

/// Pick the error worth surfacing when every REST attempt failed: connection
/// failures explain more than timeouts, timeouts more than the rest.
fn most_informative(errors: Vec<ProbeError>) -> ProbeError {
    let rank = |kind: ErrorKind| match kind {
        ErrorKind::ConnectionError => 0,
        ErrorKind::Timeout => 1,
        _ => 2,
    };
    errors
        .into_iter()
        .min_by_key(|e| rank(e.kind))
        .unwrap_or_else(|| ProbeError::new(ErrorKind::UnknownError, "rest probe failed"))
}
