//! Slot-addressable blob backend abstraction.
//!
//! A narrow capability over a key-value store: per-bucket payload and
//! metadata hash maps plus an access counter, exposed as an async trait so
//! callers above never know whether a call suspends on the network.

pub mod memory;
pub mod redis_backend;

pub use memory::InMemoryBlobBackend;
pub use redis_backend::RedisBlobBackend;

use async_trait::async_trait;

use crate::error::OramError;
use crate::model::{BucketId, Payload, SlotPosition};

/// In-band sentinel for an invalidated slot. Seven ASCII bytes; ciphertexts
/// always carry a 12-byte nonce prefix plus a 16-byte AEAD tag, so this
/// literal can never collide with a real ciphertext.
pub const NULL_SENTINEL: &str = "__null__";

/// Derives the backend key under which a bucket's metadata hash map and
/// access counter are stored, distinct from the payload key-space, exactly
/// as the original storage layer keys metadata under `-bucket_id`.
pub fn metadata_key(bucket_id: BucketId) -> String {
    format!("-{}", bucket_id)
}

pub fn payload_key(bucket_id: BucketId) -> String {
    bucket_id.to_string()
}

#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Reads one slot's payload.
    async fn get_slot(&self, bucket_id: BucketId, slot: SlotPosition) -> Result<Payload, OramError>;

    /// Writes one slot's payload without touching the rest of the bucket.
    /// Used only to invalidate a single slot after a successful read; full
    /// rewrites go through `atomic_write_bucket`.
    async fn put_slot(
        &self,
        bucket_id: BucketId,
        slot: SlotPosition,
        payload: Payload,
    ) -> Result<(), OramError>;

    /// Replaces every slot and metadata entry of `bucket_id` in one
    /// observable step and resets the access counter to 0. Implementations
    /// that cannot issue a true multi-key transaction emulate this by
    /// writing a full shadow bucket under a generation-tagged key and then
    /// flipping a single pointer key.
    async fn atomic_write_bucket(
        &self,
        bucket_id: BucketId,
        slots: Vec<Vec<u8>>,
        metadata: Vec<Vec<u8>>,
    ) -> Result<(), OramError>;

    /// Reads the raw encrypted metadata blob for one slot. Callers decrypt
    /// it with the shard's key via `bucket::decrypt_metadata_entry`; the
    /// backend itself never sees plaintext.
    async fn get_metadata(&self, bucket_id: BucketId, slot: SlotPosition) -> Result<Vec<u8>, OramError>;

    /// Current access count since the bucket's last full rewrite.
    async fn get_counter(&self, bucket_id: BucketId) -> Result<u32, OramError>;

    /// Increments and returns the post-increment access counter.
    async fn increment_counter(&self, bucket_id: BucketId) -> Result<u32, OramError>;
}
