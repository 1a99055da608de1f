//! Outbound RPC calls, shared by the router (-> shard node), the shard node
//! (-> ORAM node), and the ORAM node's eviction path (-> shard node
//! `SendBlocks`).

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::OramError;
use crate::model::{BlockId, BlockValue, Path, RequestId, StorageId};
use crate::oram::ShardNodeClient;

use super::{
    error_from_body, BlockEntry, ErrorBody, JoinRaftVoterRequest, JoinRaftVoterResponse,
    ReadPathRequest, ReadPathResponse, ReadRequest, ReadResponse, SendBlocksRequest,
    SendBlocksResponse, WriteRequest, WriteResponse, REQUEST_ID_HEADER,
};

const RPC_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(RPC_TIMEOUT)
                .build()
                .expect("reqwest client configuration is valid"),
        }
    }

    async fn post_json<Req: Serialize, Res: DeserializeOwned>(
        &self,
        url: &str,
        body: &Req,
        request_id: Option<&str>,
    ) -> Result<Res, OramError> {
        let mut builder = self.http.post(url).json(body);
        if let Some(id) = request_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OramError::BackendUnavailable(e.to_string()))?;

        if response.status().is_success() {
            response
                .json::<Res>()
                .await
                .map_err(|e| OramError::BackendUnavailable(e.to_string()))
        } else {
            match response.json::<ErrorBody>().await {
                Ok(body) => Err(error_from_body(&body)),
                Err(e) => Err(OramError::BackendUnavailable(e.to_string())),
            }
        }
    }

    pub async fn read(&self, endpoint: &str, block_id: BlockId) -> Result<Option<BlockValue>, OramError> {
        let url = format!("{endpoint}/shardnode/read");
        let resp: ReadResponse = self
            .post_json(&url, &ReadRequest { block_id }, None)
            .await?;
        Ok(resp.value)
    }

    pub async fn write(
        &self,
        endpoint: &str,
        block_id: BlockId,
        value: BlockValue,
    ) -> Result<(), OramError> {
        let url = format!("{endpoint}/shardnode/write");
        let _: WriteResponse = self
            .post_json(&url, &WriteRequest { block_id, value }, None)
            .await?;
        Ok(())
    }

    pub async fn read_path(
        &self,
        endpoint: &str,
        request_id: &RequestId,
        block_id: BlockId,
        path: Path,
        storage_id: StorageId,
    ) -> Result<Option<BlockValue>, OramError> {
        let url = format!("{endpoint}/oramnode/read-path");
        let resp: ReadPathResponse = self
            .post_json(
                &url,
                &ReadPathRequest {
                    block_id,
                    path,
                    storage_id,
                },
                Some(request_id),
            )
            .await?;
        Ok(resp.value)
    }

    pub async fn join_raft_voter(
        &self,
        endpoint: &str,
        node_id: String,
        address: String,
    ) -> Result<(), OramError> {
        let url = format!("{endpoint}/oramnode/join-raft-voter");
        let _: JoinRaftVoterResponse = self
            .post_json(&url, &JoinRaftVoterRequest { node_id, address }, None)
            .await?;
        Ok(())
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardNodeClient for RpcClient {
    async fn send_blocks(
        &self,
        endpoint: &str,
        path: Path,
        storage_id: StorageId,
        max_blocks: usize,
    ) -> Result<Vec<(BlockId, BlockValue)>, OramError> {
        let url = format!("{endpoint}/shardnode/send-blocks");
        let resp: SendBlocksResponse = self
            .post_json(
                &url,
                &SendBlocksRequest {
                    path,
                    storage_id,
                    max_blocks,
                },
                None,
            )
            .await?;
        Ok(resp
            .blocks
            .into_iter()
            .map(|entry: BlockEntry| (entry.block_id, entry.value))
            .collect())
    }

    async fn restash(&self, endpoint: &str, block_id: BlockId, value: BlockValue) -> Result<(), OramError> {
        self.write(endpoint, block_id, value).await
    }
}
