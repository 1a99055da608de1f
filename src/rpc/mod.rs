//! HTTP/JSON RPC surface shared by `router`, `shardnode`, and `oramnode`.
//!
//! Plain HTTP/JSON over `axum` (server side) and `reqwest` (client side),
//! chosen over a specific RPC framework so the transport never couples the
//! coordination core to one wire format.

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::error::OramError;
use crate::model::{BlockId, BlockValue, Path, StorageId};

/// Propagates a caller-supplied correlation id across every RPC hop.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub value: Option<BlockValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub block_id: BlockId,
    pub value: BlockValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBlocksRequest {
    pub path: Path,
    pub storage_id: StorageId,
    pub max_blocks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    pub block_id: BlockId,
    pub value: BlockValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBlocksResponse {
    pub blocks: Vec<BlockEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPathRequest {
    pub block_id: BlockId,
    pub path: Path,
    pub storage_id: StorageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPathResponse {
    pub value: Option<BlockValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRaftVoterRequest {
    pub node_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRaftVoterResponse {}

/// Wire shape for every non-2xx RPC response: the error's stable `tag()`
/// plus a human-readable message for logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn from_oram_error(err: &OramError) -> Self {
        Self {
            status: status_for(err).as_u16(),
            error: err.tag().to_string(),
            message: err.to_string(),
        }
    }
}

/// Maps an `OramError` to its HTTP status per the taxonomy in the error
/// design: retryable conditions surface as 503/409/408, caller mistakes as
/// 404, everything else as 500.
pub fn status_for(err: &OramError) -> axum::http::StatusCode {
    use axum::http::StatusCode;
    match err {
        OramError::NotLeader => StatusCode::MISDIRECTED_REQUEST,
        OramError::ConsensusTimeout | OramError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        OramError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        OramError::AuthError => StatusCode::UNPROCESSABLE_ENTITY,
        OramError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OramError::NotFound => StatusCode::NOT_FOUND,
        OramError::Conflict(_) => StatusCode::CONFLICT,
    }
}

/// Reconstructs an approximate `OramError` from a response's tag, for RPC
/// clients deciding whether to retry. The message is preserved for logs but
/// the tagged variant's own payload (if any) is re-derived from `message`
/// only for `BackendUnavailable`/`Conflict`; the others carry no payload.
pub fn error_from_body(body: &ErrorBody) -> OramError {
    match body.error.as_str() {
        "not_leader" => OramError::NotLeader,
        "consensus_timeout" => OramError::ConsensusTimeout,
        "backend_unavailable" => OramError::BackendUnavailable(body.message.clone()),
        "auth_error" => OramError::AuthError,
        "invariant_violation" => OramError::InvariantViolation(body.message.clone()),
        "upstream_timeout" => OramError::UpstreamTimeout,
        "not_found" => OramError::NotFound,
        "conflict" => OramError::Conflict(body.message.clone()),
        other => OramError::BackendUnavailable(format!("unrecognized error tag {other:?}")),
    }
}
