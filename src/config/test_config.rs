//! In-memory config fixture for tests, avoiding a round trip through YAML.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::{Backend, BackendKind, Config, Node, NodeRole, OramConfigBox};

pub fn new_test_config() -> Config {
    Config {
        oram: OramConfigBox {
            env: "test".to_string(),
            enabled: true,
            atomic_enabled: Arc::new(AtomicBool::new(true)),
            node: Node {
                role: NodeRole::OramNode,
                id: 0,
                storage_id: Some(0),
                replica_id: Some(0),
            },
            logs: None,
            traces: None,
            metrics: None,
            k8s: None,
            backend: Backend {
                kind: BackendKind::Memory,
                redis_url: None,
            },
        },
    }
}
