//! Core addressing types shared by every layer of the engine.

use serde::{Deserialize, Serialize};

/// Logical block identifier, a bounded-length UTF-8 string.
pub type BlockId = String;

/// Opaque block payload.
pub type BlockValue = Vec<u8>;

/// Leaf identifier of the bucket tree.
pub type Path = i64;

/// Storage shard identifier.
pub type StorageId = i64;

/// Physical bucket identifier; the root is `1`.
pub type BucketId = i64;

/// Position of a slot within a bucket, `0..Z+S`.
pub type SlotPosition = u32;

/// Correlates a `ReadPath` call across the RPC surface, the replicated log,
/// and structured log lines.
pub type RequestId = String;

/// A slot's physical payload as stored in the blob backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// AEAD ciphertext (nonce-prefixed).
    Encrypted(Vec<u8>),
    /// The reserved `"__null__"` sentinel: the slot holds nothing readable.
    Invalidated,
}

/// The `(path, storage_id)` pair a client-side position map tracks for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub path: Path,
    pub storage_id: StorageId,
}

/// Outcome of a `ReadPath` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(BlockValue),
    NotFound,
}
