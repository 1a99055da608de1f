// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Router,
    ShardNode,
    OramNode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Node {
    pub role: NodeRole,
    pub id: i64,
    pub storage_id: Option<i64>,
    pub replica_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Traces {
    pub enabled: bool,
    #[serde(rename = "service_name")]
    pub service_name: Option<String>,
    pub exporter: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metrics {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Probe {
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct K8S {
    pub probe: Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Backend {
    pub kind: BackendKind,
    #[serde(rename = "redis_url")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OramConfig {
    #[serde(rename = "oram")]
    pub oram: OramConfigBox,
}

impl Clone for OramConfig {
    fn clone(&self) -> Self {
        Self {
            oram: OramConfigBox {
                env: self.oram.env.clone(),
                enabled: self.oram.enabled,
                atomic_enabled: Arc::new(AtomicBool::new(self.oram.atomic_enabled.load(Ordering::Relaxed))),
                node: self.oram.node.clone(),
                logs: self.oram.logs.clone(),
                traces: self.oram.traces.clone(),
                metrics: self.oram.metrics.clone(),
                k8s: self.oram.k8s.clone(),
                backend: self.oram.backend.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OramConfigBox {
    pub env: String,
    pub enabled: bool,
    #[serde(skip)]
    pub atomic_enabled: Arc<AtomicBool>,
    pub node: Node,
    pub logs: Option<Logs>,
    pub traces: Option<Traces>,
    pub metrics: Option<Metrics>,
    pub k8s: Option<K8S>,
    pub backend: Backend,
}

pub trait ConfigTrait {
    fn logs(&self) -> Option<&Logs>;
    fn is_prod(&self) -> bool;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, v: bool);
    fn node(&self) -> &Node;
    fn traces(&self) -> Option<&Traces>;
    fn metrics(&self) -> Option<&Metrics>;
    fn k8s(&self) -> Option<&K8S>;
    fn backend(&self) -> &Backend;
}

pub type Config = OramConfig;

impl ConfigTrait for Config {
    fn logs(&self) -> Option<&Logs> {
        self.oram.logs.as_ref()
    }

    fn is_prod(&self) -> bool {
        self.oram.env == PROD
    }

    fn is_enabled(&self) -> bool {
        self.oram.atomic_enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, v: bool) {
        self.oram.atomic_enabled.store(v, Ordering::Relaxed);
    }

    fn node(&self) -> &Node {
        &self.oram.node
    }

    fn traces(&self) -> Option<&Traces> {
        self.oram.traces.as_ref()
    }

    fn metrics(&self) -> Option<&Metrics> {
        self.oram.metrics.as_ref()
    }

    fn k8s(&self) -> Option<&K8S> {
        self.oram.k8s.as_ref()
    }

    fn backend(&self) -> &Backend {
        &self.oram.backend
    }
}

impl Config {
    /// Loads the root process-level document (node identity, logging,
    /// tracing, metrics, k8s probe, backend selection) from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let abs_path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve absolute config filepath: {:?}", path))?;

        let data = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("read config yaml file {:?}", abs_path))?;

        let mut cfg: OramConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("unmarshal yaml from {:?}", abs_path))?;

        cfg.oram.atomic_enabled = Arc::new(AtomicBool::new(cfg.oram.enabled));

        Ok(cfg)
    }
}

/// One RPC-reachable replica, as laid out in `router_endpoints.yaml`,
/// `shardnode_endpoints.yaml`, and `oramnode_endpoints.yaml` — loaded
/// independently of the root document, the way the original's `config.go`
/// keeps each endpoint list its own small file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoint {
    #[serde(rename = "exposed_ip")]
    pub exposed_ip: String,
    pub port: u16,
    pub id: i64,
    pub replica_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct EndpointList {
    endpoints: Vec<Endpoint>,
}

fn read_endpoint_list<P: AsRef<Path>>(path: P) -> Result<Vec<Endpoint>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("read endpoint list {:?}", path))?;
    let parsed: EndpointList =
        serde_yaml::from_str(&data).with_context(|| format!("parse endpoint list {:?}", path))?;
    Ok(parsed.endpoints)
}

pub fn read_router_endpoints<P: AsRef<Path>>(path: P) -> Result<Vec<Endpoint>> {
    read_endpoint_list(path)
}

pub fn read_shardnode_endpoints<P: AsRef<Path>>(path: P) -> Result<Vec<Endpoint>> {
    read_endpoint_list(path)
}

pub fn read_oramnode_endpoints<P: AsRef<Path>>(path: P) -> Result<Vec<Endpoint>> {
    read_endpoint_list(path)
}

/// ORAM tree and eviction tuning parameters, loaded from their own
/// `parameters.yaml` as the original `ReadParameters` does.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Parameters {
    pub z: usize,
    pub s: usize,
    pub shift: u32,
    pub level_count: u32,
    pub max_access_count: u32,
    #[serde(rename = "max_blocks_to_send")]
    pub max_blocks_to_send: usize,
    #[serde(rename = "eviction_rate", with = "humantime_serde", default)]
    pub eviction_rate: Option<Duration>,
    #[serde(rename = "batch_size")]
    pub batch_size: Option<usize>,
    #[serde(rename = "block_size")]
    pub block_size: Option<usize>,
}

pub fn read_parameters<P: AsRef<Path>>(path: P) -> Result<Parameters> {
    let path = path.as_ref();
    let data =
        std::fs::read_to_string(path).with_context(|| format!("read parameters file {:?}", path))?;
    serde_yaml::from_str(&data).with_context(|| format!("parse parameters file {:?}", path))
}

mod test_config;
#[allow(dead_code)]
pub use test_config::new_test_config;
