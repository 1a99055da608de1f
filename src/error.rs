//! Error taxonomy for the ORAM storage engine.

use thiserror::Error;

/// All errors the engine surfaces to callers, tagged so RPC layers can map
/// them to a stable status code instead of leaking internal detail.
#[derive(Debug, Error)]
pub enum OramError {
    /// The contacted replica is not the leader; retryable against another replica.
    #[error("not leader")]
    NotLeader,

    /// A log proposal did not commit within its deadline.
    #[error("consensus timeout")]
    ConsensusTimeout,

    /// The blob backend could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Slot decryption failed (tampering or wrong key).
    #[error("authentication failed")]
    AuthError,

    /// An internal invariant was violated (e.g. corrupted bucket metadata).
    /// Call sites on the hot read/reshuffle path abort the process instead
    /// of constructing this variant at all; it still exists for decode-time
    /// checks that surface through the ordinary error path.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A shard node did not respond to a `SendBlocks` pull in time.
    #[error("upstream timeout")]
    UpstreamTimeout,

    /// The requested resource does not exist in the blob backend.
    #[error("not found")]
    NotFound,

    /// A conflicting operation is already in progress (e.g. overlapping eviction).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl OramError {
    /// Stable short tag used in RPC error bodies and metrics labels.
    pub fn tag(&self) -> &'static str {
        match self {
            OramError::NotLeader => "not_leader",
            OramError::ConsensusTimeout => "consensus_timeout",
            OramError::BackendUnavailable(_) => "backend_unavailable",
            OramError::AuthError => "auth_error",
            OramError::InvariantViolation(_) => "invariant_violation",
            OramError::UpstreamTimeout => "upstream_timeout",
            OramError::NotFound => "not_found",
            OramError::Conflict(_) => "conflict",
        }
    }
}
