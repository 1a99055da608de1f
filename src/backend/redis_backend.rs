//! Redis-backed blob backend, using hash-field operations on the original
//! storage layer's key layout: `bucket_id` for payloads, `-bucket_id` for
//! metadata and the access counter.

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::OramError;
use crate::model::{BucketId, Payload, SlotPosition};

use super::{metadata_key, payload_key, NULL_SENTINEL};

fn shadow_hash_key(base: &str, buffer: &str) -> String {
    format!("{}:shadow:{}", base, buffer)
}

fn pointer_key(base: &str) -> String {
    format!("{}:ptr", base)
}

fn counter_field() -> &'static str {
    "accessCount"
}

fn to_backend_err(e: redis::RedisError) -> OramError {
    OramError::BackendUnavailable(e.to_string())
}

pub struct RedisBlobBackend {
    conn: Mutex<redis::aio::MultiplexedConnection>,
}

impl RedisBlobBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, OramError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| OramError::BackendUnavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(to_backend_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn current_buffer(&self, base: &str) -> Result<&'static str, OramError> {
        let mut conn = self.conn.lock().await;
        let ptr: Option<String> = conn.get(pointer_key(base)).await.map_err(to_backend_err)?;
        Ok(match ptr.as_deref() {
            Some("b") => "b",
            _ => "a",
        })
    }
}

#[async_trait]
impl super::BlobBackend for RedisBlobBackend {
    async fn get_slot(&self, bucket_id: BucketId, slot: SlotPosition) -> Result<Payload, OramError> {
        let base = payload_key(bucket_id);
        let buffer = self.current_buffer(&base).await?;
        let mut conn = self.conn.lock().await;
        let raw: Option<Vec<u8>> = conn
            .hget(shadow_hash_key(&base, buffer), slot.to_string())
            .await
            .map_err(to_backend_err)?;
        Ok(match raw {
            None => Payload::Invalidated,
            Some(bytes) if bytes == NULL_SENTINEL.as_bytes() => Payload::Invalidated,
            Some(bytes) => Payload::Encrypted(bytes),
        })
    }

    async fn put_slot(
        &self,
        bucket_id: BucketId,
        slot: SlotPosition,
        payload: Payload,
    ) -> Result<(), OramError> {
        let base = payload_key(bucket_id);
        let buffer = self.current_buffer(&base).await?;
        let bytes: Vec<u8> = match payload {
            Payload::Invalidated => NULL_SENTINEL.as_bytes().to_vec(),
            Payload::Encrypted(ct) => ct,
        };
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .hset(shadow_hash_key(&base, buffer), slot.to_string(), bytes)
            .await
            .map_err(to_backend_err)?;
        Ok(())
    }

    async fn atomic_write_bucket(
        &self,
        bucket_id: BucketId,
        slots: Vec<Vec<u8>>,
        metadata: Vec<Vec<u8>>,
    ) -> Result<(), OramError> {
        let payload_base = payload_key(bucket_id);
        let meta_base = metadata_key(bucket_id);
        let current = self.current_buffer(&payload_base).await?;
        let next = if current == "a" { "b" } else { "a" };

        let payload_shadow = shadow_hash_key(&payload_base, next);
        let meta_shadow = shadow_hash_key(&meta_base, next);

        let mut conn = self.conn.lock().await;

        let _: () = conn.del(&payload_shadow).await.map_err(to_backend_err)?;
        let _: () = conn.del(&meta_shadow).await.map_err(to_backend_err)?;

        for (i, slot) in slots.iter().enumerate() {
            let _: () = conn
                .hset(&payload_shadow, i.to_string(), slot.clone())
                .await
                .map_err(to_backend_err)?;
        }
        for (i, entry) in metadata.iter().enumerate() {
            let _: () = conn
                .hset(&meta_shadow, i.to_string(), entry.clone())
                .await
                .map_err(to_backend_err)?;
        }
        let _: () = conn
            .hset(&meta_shadow, counter_field(), 0i64)
            .await
            .map_err(to_backend_err)?;

        // The only step observers race with: flip both pointers atomically.
        let _: () = redis::pipe()
            .atomic()
            .set(pointer_key(&payload_base), next)
            .set(pointer_key(&meta_base), next)
            .query_async(&mut *conn)
            .await
            .map_err(to_backend_err)?;

        Ok(())
    }

    async fn get_metadata(&self, bucket_id: BucketId, slot: SlotPosition) -> Result<Vec<u8>, OramError> {
        let base = metadata_key(bucket_id);
        let buffer = self.current_buffer(&base).await?;
        let mut conn = self.conn.lock().await;
        let raw: Option<Vec<u8>> = conn
            .hget(shadow_hash_key(&base, buffer), slot.to_string())
            .await
            .map_err(to_backend_err)?;
        raw.ok_or(OramError::NotFound)
    }

    async fn get_counter(&self, bucket_id: BucketId) -> Result<u32, OramError> {
        let base = metadata_key(bucket_id);
        let buffer = self.current_buffer(&base).await?;
        let mut conn = self.conn.lock().await;
        let val: Option<i64> = conn
            .hget(shadow_hash_key(&base, buffer), counter_field())
            .await
            .map_err(to_backend_err)?;
        Ok(val.unwrap_or(0) as u32)
    }

    async fn increment_counter(&self, bucket_id: BucketId) -> Result<u32, OramError> {
        let base = metadata_key(bucket_id);
        let buffer = self.current_buffer(&base).await?;
        let mut conn = self.conn.lock().await;
        let val: i64 = conn
            .hincr(shadow_hash_key(&base, buffer), counter_field(), 1i64)
            .await
            .map_err(to_backend_err)?;
        Ok(val as u32)
    }
}
