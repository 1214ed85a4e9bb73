//! Pure parsers for the two response shapes the prober understands.
//!
//! Tendermint RPC `/status` and Cosmos REST `blocks/latest` both report the
//! chain head, with different field paths. Parsing is kept free of I/O so the
//! prober dispatches on `EndpointKind` and the parsers stay unit-testable.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{ErrorKind, ProbeError};

/// Chain head data extracted from a probe response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub chain_id: Option<String>,
    pub height: Option<u64>,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcStatusBody {
    #[serde(default)]
    result: RpcStatusResult,
}

#[derive(Debug, Default, Deserialize)]
struct RpcStatusResult {
    #[serde(default)]
    node_info: RpcNodeInfo,
    #[serde(default)]
    sync_info: RpcSyncInfo,
}

#[derive(Debug, Default, Deserialize)]
struct RpcNodeInfo {
    network: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcSyncInfo {
    latest_block_height: Option<String>,
    latest_block_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RestBlockBody {
    #[serde(default)]
    block: RestBlock,
}

#[derive(Debug, Default, Deserialize)]
struct RestBlock {
    #[serde(default)]
    header: RestBlockHeader,
}

#[derive(Debug, Default, Deserialize)]
struct RestBlockHeader {
    chain_id: Option<String>,
    height: Option<String>,
    time: Option<String>,
}

/// Parse a Tendermint RPC `/status` body.
///
/// Height and time live under `result.sync_info`, the reported chain id under
/// `result.node_info.network`.
pub fn parse_rpc_status(body: &[u8]) -> Result<BlockInfo, ProbeError> {
    let status: RpcStatusBody = serde_json::from_slice(body)
        .map_err(|e| ProbeError::new(ErrorKind::ParseError, format!("invalid json: {e}")))?;

    Ok(BlockInfo {
        chain_id: status.result.node_info.network,
        height: parse_height(status.result.sync_info.latest_block_height.as_deref())?,
        time: status.result.sync_info.latest_block_time.as_deref().and_then(parse_block_time),
    })
}

/// Parse a Cosmos REST `blocks/latest` body (both the v1beta1 and the legacy
/// path return this shape).
pub fn parse_rest_block(body: &[u8]) -> Result<BlockInfo, ProbeError> {
    let latest: RestBlockBody = serde_json::from_slice(body)
        .map_err(|e| ProbeError::new(ErrorKind::ParseError, format!("invalid json: {e}")))?;

    Ok(BlockInfo {
        chain_id: latest.block.header.chain_id,
        height: parse_height(latest.block.header.height.as_deref())?,
        time: latest.block.header.time.as_deref().and_then(parse_block_time),
    })
}

/// Heights arrive as stringified integers on both protocols. A missing height
/// is tolerated (downgrades the classification later); a non-numeric one is a
/// malformed response.
fn parse_height(raw: Option<&str>) -> Result<Option<u64>, ProbeError> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ProbeError::new(ErrorKind::ParseError, format!("invalid block height: {s:?}"))),
    }
}

/// Parse an RFC3339 block timestamp into UTC.
///
/// Tendermint emits nanosecond precision (`2024-01-02T03:04:05.123456789Z`),
/// which chrono accepts directly. Unparseable input maps to None, the caller
/// decides whether that is fatal.
pub fn parse_block_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Verify the chain id reported by the endpoint against the catalog's
/// expectation. Either side missing means nothing to verify.
pub fn verify_chain_id(expected: Option<&str>, reported: Option<&str>) -> Result<(), ProbeError> {
    if let (Some(expected), Some(reported)) = (expected, reported) {
        if expected != reported {
            return Err(ProbeError::new(
                ErrorKind::ChainMismatch,
                format!("expected chain id {expected}, endpoint reports {reported}"),
            ));
        }
    }
    Ok(())
}
