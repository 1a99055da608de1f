//! `oramnode`: the consensus-replicated coordination core binary. Loads its
//! tuning parameters and the shard-node endpoints it pulls from during
//! eviction from files alongside the main config, mirroring the original
//! implementation's `cmd/oramnode/main.go` bootstrap.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use oblistore::bucket::BucketParams;
use oblistore::config::{self, Config, ConfigTrait};
use oblistore::consensus::{OramFsm, SingleNodeRaftHandle};
use oblistore::crypto::ShardKey;
use oblistore::rpc::client::RpcClient;
use oblistore::shutdown::GracefulShutdown;
use oblistore::tree::TreeShape;
use oblistore::{backend, dedlog, liveness, oram};

/// The ORAM coordination core for one storage shard.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    oramnodeid: i64,
    #[arg(long)]
    replicaid: Option<i64>,
    #[arg(long, default_value = "0.0.0.0")]
    ip: String,
    #[arg(long)]
    rpcport: u16,
    /// Kept for CLI parity with a multi-node deployment; the shipped
    /// `SingleNodeRaftHandle` neither listens on nor persists to this.
    #[arg(long)]
    raftport: Option<u16>,
    #[arg(long)]
    raftdir: Option<PathBuf>,
    #[arg(long)]
    joinaddr: Option<String>,
    #[arg(long)]
    conf: PathBuf,
    #[arg(long)]
    logpath: Option<PathBuf>,
}

fn configure_logger(cfg: &Config) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let log_level = cfg
        .logs()
        .and_then(|logs| logs.level.as_ref())
        .map(|s| s.as_str())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().pretty()).init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    let cfg = Config::load(&args.conf).context("failed to load config")?;
    configure_logger(&cfg);

    let dedup_token = shutdown_token.clone();
    tokio::spawn(async move { dedlog::start_dedup_logger(dedup_token).await });

    let graceful = GracefulShutdown::new(shutdown_token.clone());
    graceful.set_graceful_timeout(Duration::from_secs(30)).await;

    let probe_timeout = cfg
        .k8s()
        .and_then(|k8s| k8s.probe.timeout)
        .unwrap_or(Duration::from_secs(5));
    let probe = Arc::new(liveness::Probe::new(probe_timeout));

    let conf_dir: &Path = args.conf.parent().unwrap_or_else(|| Path::new("."));
    let parameters = config::read_parameters(conf_dir.join("parameters.yaml"))
        .context("failed to load parameters.yaml")?;
    let shardnode_endpoints = config::read_shardnode_endpoints(conf_dir.join("shardnode_endpoints.yaml"))
        .unwrap_or_default()
        .into_iter()
        .map(|e| format!("http://{}:{}", e.exposed_ip, e.port))
        .collect::<Vec<_>>();

    let storage_id = cfg.node().storage_id.unwrap_or(0);
    let tree = TreeShape {
        shift: parameters.shift,
        level_count: parameters.level_count,
    };
    let params = BucketParams {
        z: parameters.z,
        s: parameters.s,
    };

    // A production deployment provisions this out of band; the reference
    // binary generates a process-local key, which is fine for an in-memory
    // backend but means ciphertext written before a restart is unreadable
    // after one (bucket-format schema evolution / key management is out of
    // scope, per the non-goals).
    let key = ShardKey::generate();

    let blob_backend: Arc<dyn backend::BlobBackend> = match cfg.backend().kind {
        config::BackendKind::Memory => Arc::new(backend::InMemoryBlobBackend::new()),
        config::BackendKind::Redis => {
            let url = cfg
                .backend()
                .redis_url
                .as_deref()
                .context("backend.kind = redis requires backend.redis_url")?;
            Arc::new(backend::RedisBlobBackend::connect(url).await?)
        }
    };

    let fsm = Arc::new(OramFsm::new());
    let raft = SingleNodeRaftHandle::new(fsm.clone(), shutdown_token.clone());

    if let Some(join) = &args.joinaddr {
        warn!(
            component = "oramnode",
            event = "join_addr_ignored",
            joinaddr = %join,
            "the shipped single-node raft handle does not support joining a cluster; \
             a multi-node deployment swaps in a real consensus crate behind RaftHandle"
        );
    }

    let node_cfg = oram::OramNodeConfig {
        storage_id,
        tree,
        params,
        max_access_count: parameters.max_access_count,
        max_blocks_to_send: parameters.max_blocks_to_send,
        key,
        shard_node_endpoints: shardnode_endpoints,
    };
    let node = oram::OramNode::new(
        node_cfg,
        blob_backend,
        raft,
        fsm,
        Arc::new(RpcClient::new()),
        shutdown_token.clone(),
    );

    // Background, periodic eviction: the ORAM core picks its own
    // (path, storage_id) rather than waiting for a caller to ask.
    match parameters.eviction_rate {
        Some(eviction_rate) => {
            let evict_node = node.clone();
            let evict_shutdown = shutdown_token.clone();
            graceful.add(1);
            let evict_done = graceful.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(eviction_rate);
                loop {
                    tokio::select! {
                        _ = evict_shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let (path, _) = tree.random_path_and_storage(1);
                            match evict_node.evict(path, storage_id).await {
                                Ok(residual) if !residual.is_empty() => {
                                    tracing::debug!(
                                        component = "oramnode",
                                        event = "eviction_residual",
                                        path,
                                        residual_blocks = residual.len(),
                                    );
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::warn!(
                                        component = "oramnode",
                                        event = "eviction_failed",
                                        path,
                                        error = %e,
                                    );
                                }
                            }
                        }
                    }
                }
                evict_done.done();
            });
        }
        None => {
            warn!(
                component = "oramnode",
                event = "eviction_ticker_disabled",
                "parameters.eviction_rate not set; periodic eviction will not run"
            );
        }
    }

    let node_for_metrics = node.clone();
    let app: Router = oram::build_router(node.clone(), 1000)
        .merge(
            Router::new()
                .route(
                    "/metrics",
                    get(move || {
                        let node = node_for_metrics.clone();
                        async move { node.metrics().render() }
                    }),
                )
                .route(
                    "/healthz",
                    get(move || {
                        let probe = probe.clone();
                        async move {
                            if probe.is_alive_async().await {
                                "ok"
                            } else {
                                "unavailable"
                            }
                        }
                    }),
                ),
        );

    let addr: SocketAddr = format!("{}:{}", args.ip, args.rpcport)
        .parse()
        .context("invalid ip:rpcport")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(component = "oramnode", event = "listening", %addr, oramnodeid = args.oramnodeid);

    graceful.add(1);
    let graceful_done = graceful.clone();
    let serve_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(component = "oramnode", event = "serve_failed", error = %e);
        }
        graceful_done.done();
    });

    graceful.await_shutdown().await?;
    Ok(())
}
