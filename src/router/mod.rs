//! Router: the client-facing, stateless front end. Hashes `block_id` modulo
//! the shard count and forwards to the owning shard node over HTTP/JSON.
//! Deliberately unsophisticated — no load awareness, no caching — per the
//! out-of-scope note on router internals.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::OramError;
use crate::middleware::{Middleware, PanicRecoverMiddleware, RateLimitMiddleware};
use crate::model::{BlockId, BlockValue};
use crate::rpc::client::RpcClient;
use crate::rpc::server::RpcError;
use crate::rpc::{ReadRequest, ReadResponse, WriteRequest, WriteResponse};

pub struct RouterConfig {
    /// One entry per shard node, in partition order; `block_id`'s hash modulo
    /// `len()` selects the owning shard.
    pub shardnode_endpoints: Vec<String>,
}

pub struct RouterServer {
    shardnode_endpoints: Vec<String>,
    rpc: RpcClient,
}

impl RouterServer {
    pub fn new(cfg: RouterConfig) -> Self {
        Self {
            shardnode_endpoints: cfg.shardnode_endpoints,
            rpc: RpcClient::new(),
        }
    }

    /// Hashes `block_id` via xxh3 modulo the shard count.
    fn shard_endpoint(&self, block_id: &str) -> Result<&str, OramError> {
        if self.shardnode_endpoints.is_empty() {
            return Err(OramError::BackendUnavailable("no shard node endpoints configured".into()));
        }
        let hash = xxh3_64(block_id.as_bytes());
        let index = (hash % self.shardnode_endpoints.len() as u64) as usize;
        Ok(&self.shardnode_endpoints[index])
    }

    pub async fn read(&self, block_id: BlockId) -> Result<Option<BlockValue>, OramError> {
        let endpoint = self.shard_endpoint(&block_id)?;
        self.rpc.read(endpoint, block_id).await
    }

    pub async fn write(&self, block_id: BlockId, value: BlockValue) -> Result<(), OramError> {
        let endpoint = self.shard_endpoint(&block_id)?;
        self.rpc.write(endpoint, block_id, value).await
    }
}

async fn read_handler(
    State(server): State<Arc<RouterServer>>,
    Json(req): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, RpcError> {
    let value = server.read(req.block_id).await?;
    Ok(Json(ReadResponse { value }))
}

async fn write_handler(
    State(server): State<Arc<RouterServer>>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, RpcError> {
    server.write(req.block_id, req.value).await?;
    Ok(Json(WriteResponse {}))
}

/// Builds the `/router/*` HTTP surface, panic-recovery and rate-limiting
/// middleware already layered on per the ambient-stack requirement.
pub fn build_router(server: Arc<RouterServer>, requests_per_second: u32) -> Router {
    let router = Router::new()
        .route("/router/read", post(read_handler))
        .route("/router/write", post(write_handler))
        .with_state(server);

    let router = PanicRecoverMiddleware::new().apply(router);
    RateLimitMiddleware::new(requests_per_second).apply(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_block_id_always_routes_to_the_same_shard() {
        let router = RouterServer::new(RouterConfig {
            shardnode_endpoints: vec![
                "http://shard-0".to_string(),
                "http://shard-1".to_string(),
                "http://shard-2".to_string(),
            ],
        });
        let first = router.shard_endpoint("block-a").unwrap().to_string();
        let second = router.shard_endpoint("block-a").unwrap().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_shard_list_is_backend_unavailable() {
        let router = RouterServer::new(RouterConfig { shardnode_endpoints: Vec::new() });
        assert!(matches!(
            router.shard_endpoint("block-a"),
            Err(OramError::BackendUnavailable(_))
        ));
    }
}
