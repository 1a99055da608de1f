//! Shard node: the thin, position-map-owning front end between a client and
//! the ORAM coordination core. Kept deliberately unsophisticated per the
//! out-of-scope note on router/shard-node internals — no persistence, no
//! load-aware placement, just the position map and a stash.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use rand::RngCore;
use tracing::{debug, warn};

use crate::error::OramError;
use crate::middleware::{Middleware, PanicRecoverMiddleware, RateLimitMiddleware};
use crate::model::{BlockId, BlockValue, Placement, StorageId};
use crate::rpc::client::RpcClient;
use crate::rpc::server::RpcError;
use crate::rpc::{
    BlockEntry, ReadRequest, ReadResponse, SendBlocksRequest, SendBlocksResponse, WriteRequest,
    WriteResponse,
};
use crate::tree::TreeShape;

/// One storage shard's reachable ORAM node replicas. Requests try replicas
/// in order; the first to not fail with `NotLeader`/`BackendUnavailable`
/// wins, mirroring the "retry against another replica" policy in the error
/// design.
pub type OramNodeReplicaSet = Vec<String>;

pub struct ShardNodeConfig {
    pub tree: TreeShape,
    pub num_storage_shards: u32,
    /// Indexed by `storage_id`.
    pub oramnode_endpoints: Vec<OramNodeReplicaSet>,
}

pub struct ShardNodeServer {
    tree: TreeShape,
    num_storage_shards: u32,
    oramnode_endpoints: Vec<OramNodeReplicaSet>,
    rpc: RpcClient,
    position_map: DashMap<BlockId, Placement>,
    stash: DashMap<BlockId, BlockValue>,
}

fn fresh_request_id() -> String {
    let mut raw = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

impl ShardNodeServer {
    pub fn new(cfg: ShardNodeConfig) -> Self {
        Self {
            tree: cfg.tree,
            num_storage_shards: cfg.num_storage_shards,
            oramnode_endpoints: cfg.oramnode_endpoints,
            rpc: RpcClient::new(),
            position_map: DashMap::new(),
            stash: DashMap::new(),
        }
    }

    fn assign_placement(&self, block_id: &BlockId) -> Placement {
        let (path, storage_id) = self.tree.random_path_and_storage(self.num_storage_shards);
        let placement = Placement { path, storage_id };
        self.position_map.insert(block_id.clone(), placement);
        placement
    }

    fn current_placement(&self, block_id: &BlockId) -> Placement {
        if let Some(existing) = self.position_map.get(block_id) {
            *existing
        } else {
            self.assign_placement(block_id)
        }
    }

    /// Calls `ReadPath` against the replica set for `storage_id`, trying
    /// each endpoint in turn until one replies without a replica-local
    /// error (`NotLeader`/`BackendUnavailable`).
    async fn call_read_path(
        &self,
        block_id: BlockId,
        placement: Placement,
    ) -> Result<Option<BlockValue>, OramError> {
        let replicas = self
            .oramnode_endpoints
            .get(placement.storage_id as usize)
            .ok_or_else(|| OramError::BackendUnavailable(format!("no ORAM node replicas configured for storage {}", placement.storage_id)))?;

        let request_id = fresh_request_id();
        let mut last_err = OramError::BackendUnavailable("no ORAM node replicas reachable".into());
        for endpoint in replicas {
            match self
                .rpc
                .read_path(endpoint, &request_id, block_id.clone(), placement.path, placement.storage_id)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e @ (OramError::NotLeader | OramError::BackendUnavailable(_))) => last_err = e,
                Err(e) => return Err(e),
            }
        }
        warn!(component = "shardnode", event = "read_path_exhausted", %request_id);
        Err(last_err)
    }

    /// `Read(block)`: looks up (or assigns) the block's current placement,
    /// asks the owning ORAM node to read it, falls back to the local stash
    /// on a miss, then re-randomises the placement regardless of outcome —
    /// Path ORAM's "assign a new random path on every access".
    pub async fn read(&self, block_id: BlockId) -> Result<Option<BlockValue>, OramError> {
        let placement = self.current_placement(&block_id);
        let result = self.call_read_path(block_id.clone(), placement).await;

        let value = match result {
            Ok(Some(value)) => Some(value),
            Ok(None) => self.stash.get(&block_id).map(|v| v.clone()),
            Err(e) => return Err(e),
        };

        self.assign_placement(&block_id);
        debug!(component = "shardnode", event = "read", block_id = %block_id, hit = value.is_some());
        Ok(value)
    }

    /// `Write(block, value)`: assigns a placement if the block is new,
    /// stashes the value for the next eviction of its path, and returns.
    pub fn write(&self, block_id: BlockId, value: BlockValue) {
        self.current_placement(&block_id);
        self.stash.insert(block_id, value);
    }

    /// `SendBlocks(path, storage_id, max_blocks)`: hands up to `max_blocks`
    /// stash entries whose assigned placement matches `path`/`storage_id` to
    /// the calling ORAM node, which is about to place them back into a
    /// bucket during eviction — removed from the stash on hand-off since
    /// they are no longer "not currently resident in any bucket".
    pub fn send_blocks(
        &self,
        path: crate::model::Path,
        storage_id: StorageId,
        max_blocks: usize,
    ) -> Vec<(BlockId, BlockValue)> {
        let matching: Vec<BlockId> = self
            .position_map
            .iter()
            .filter(|entry| entry.value().path == path && entry.value().storage_id == storage_id)
            .map(|entry| entry.key().clone())
            .filter(|block_id| self.stash.contains_key(block_id))
            .take(max_blocks)
            .collect();

        let mut out = Vec::with_capacity(matching.len());
        for block_id in matching {
            if let Some((_, value)) = self.stash.remove(&block_id) {
                out.push((block_id, value));
            }
        }
        out
    }
}

async fn read_handler(
    State(server): State<Arc<ShardNodeServer>>,
    Json(req): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, RpcError> {
    let value = server.read(req.block_id).await?;
    Ok(Json(ReadResponse { value }))
}

async fn write_handler(
    State(server): State<Arc<ShardNodeServer>>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, RpcError> {
    server.write(req.block_id, req.value);
    Ok(Json(WriteResponse {}))
}

async fn send_blocks_handler(
    State(server): State<Arc<ShardNodeServer>>,
    Json(req): Json<SendBlocksRequest>,
) -> Json<SendBlocksResponse> {
    let blocks = server
        .send_blocks(req.path, req.storage_id, req.max_blocks)
        .into_iter()
        .map(|(block_id, value)| BlockEntry { block_id, value })
        .collect();
    Json(SendBlocksResponse { blocks })
}

/// Builds the `/shardnode/*` HTTP surface, panic-recovery and rate-limiting
/// middleware already layered on per the ambient-stack requirement.
pub fn build_router(server: Arc<ShardNodeServer>, requests_per_second: u32) -> Router {
    let router = Router::new()
        .route("/shardnode/read", post(read_handler))
        .route("/shardnode/write", post(write_handler))
        .route("/shardnode/send-blocks", post(send_blocks_handler))
        .with_state(server);

    let router = PanicRecoverMiddleware::new().apply(router);
    RateLimitMiddleware::new(requests_per_second).apply(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> ShardNodeServer {
        ShardNodeServer::new(ShardNodeConfig {
            tree: TreeShape { shift: 1, level_count: 3 },
            num_storage_shards: 1,
            oramnode_endpoints: vec![Vec::new()],
        })
    }

    #[test]
    fn write_then_send_blocks_returns_stashed_value() {
        let server = test_server();
        server.write("block-a".to_string(), b"hello".to_vec());
        let placement = server.current_placement(&"block-a".to_string());
        let blocks = server.send_blocks(placement.path, placement.storage_id, 8);
        assert_eq!(blocks, vec![("block-a".to_string(), b"hello".to_vec())]);
        // Pulled once, so a second pull for the same path finds nothing.
        let blocks2 = server.send_blocks(placement.path, placement.storage_id, 8);
        assert!(blocks2.is_empty());
    }

    #[test]
    fn send_blocks_respects_max_blocks() {
        let server = test_server();
        server.write("a".to_string(), b"1".to_vec());
        server.write("b".to_string(), b"2".to_vec());
        let leaf = server.tree.random_path_and_storage(1);
        server.position_map.insert("a".to_string(), Placement { path: leaf.0, storage_id: leaf.1 });
        server.position_map.insert("b".to_string(), Placement { path: leaf.0, storage_id: leaf.1 });
        let blocks = server.send_blocks(leaf.0, leaf.1, 1);
        assert_eq!(blocks.len(), 1);
    }
}
