//! Lightweight span/event instrumentation, correlated by `request_id`.
//!
//! The teacher wires an OpenTelemetry OTLP exporter behind this same
//! `enabled` toggle; this service's dependency stack carries no exporter, so
//! `apply` only flips the toggle consulted by `request_id` span helpers
//! below — tracing always flows through the `tracing` crate's subscriber,
//! exporter or not.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::config::Traces;

pub const ATTR_REQUEST_ID: &str = "request_id";
pub const ATTR_BLOCK_ID: &str = "block_id";
pub const ATTR_PATH: &str = "path";
pub const ATTR_STORAGE_ID: &str = "storage_id";

static ENABLED: AtomicBool = AtomicBool::new(false);

pub fn is_active_tracing() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn enable_tracing() {
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_tracing() {
    ENABLED.store(false, Ordering::Relaxed);
}

/// Applies tracing configuration and returns a shutdown function, mirroring
/// the teacher's `apply` signature so binaries wire it up identically.
pub fn apply(
    _shutdown_token: CancellationToken,
    cfg: Option<Traces>,
) -> Box<dyn Fn(CancellationToken) -> Result<()> + Send + Sync> {
    match cfg {
        Some(c) if c.enabled => ENABLED.store(true, Ordering::Relaxed),
        _ => ENABLED.store(false, Ordering::Relaxed),
    }
    Box::new(move |_| Ok(()))
}

/// A `tracing` span pre-populated with the correlation fields every RPC
/// entry point and `OramNode` call carries through its lifetime.
pub fn request_span(operation: &'static str, request_id: &str) -> Span {
    tracing::info_span!("oram_request", operation, request_id = %request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_toggles_enabled_flag() {
        let token = CancellationToken::new();
        apply(
            token.clone(),
            Some(Traces {
                enabled: true,
                service_name: None,
                exporter: None,
                endpoint: None,
            }),
        );
        assert!(is_active_tracing());
        apply(token, None);
        assert!(!is_active_tracing());
    }
}
