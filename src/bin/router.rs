//! `router`: the client-facing, stateless front end. Hashes `block_id` and
//! forwards to the owning shard node.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use oblistore::config::{self, Config, ConfigTrait};
use oblistore::router::{self, RouterConfig, RouterServer};
use oblistore::shutdown::GracefulShutdown;
use oblistore::{dedlog, liveness};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    routerid: i64,
    #[arg(long)]
    replicaid: Option<i64>,
    #[arg(long, default_value = "0.0.0.0")]
    ip: String,
    #[arg(long)]
    rpcport: u16,
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
    let shardnode_endpoints = config::read_shardnode_endpoints(conf_dir.join("shardnode_endpoints.yaml"))
        .context("failed to load shardnode_endpoints.yaml")?
        .into_iter()
        .map(|e| format!("http://{}:{}", e.exposed_ip, e.port))
        .collect::<Vec<_>>();

    let server = Arc::new(RouterServer::new(RouterConfig { shardnode_endpoints }));

    let app: Router = router::build_router(server, 2000).merge(Router::new().route(
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
    ));

    let addr: SocketAddr = format!("{}:{}", args.ip, args.rpcport)
        .parse()
        .context("invalid ip:rpcport")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(component = "router", event = "listening", %addr, routerid = args.routerid);

    graceful.add(1);
    let graceful_done = graceful.clone();
    let serve_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(component = "router", event = "serve_failed", error = %e);
        }
        graceful_done.done();
    });

    graceful.await_shutdown().await?;
    Ok(())
}
