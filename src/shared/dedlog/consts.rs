//! Shared constants for the deduplicated logger.

/// Component tag attached to every deduplicated log line.
pub const COMPONENT: &str = "dedlog";
