//! Bucket layout: the `Z` real + `S` dummy slot arrangement and its
//! encrypted metadata record.

use byteorder::{LittleEndian, WriteBytesExt};
use rand::seq::SliceRandom;

use crate::crypto::{self, ShardKey};
use crate::error::OramError;
use crate::model::{BlockId, BlockValue, BucketId, SlotPosition};

/// `(Z, S)` capacity of every bucket in a tree.
#[derive(Debug, Clone, Copy)]
pub struct BucketParams {
    pub z: usize,
    pub s: usize,
}

impl BucketParams {
    pub fn total_slots(&self) -> usize {
        self.z + self.s
    }
}

/// Result of a full bucket rewrite: ciphertexts ready to hand to the blob
/// backend via `atomic_write_bucket`.
pub struct RewrittenBucket {
    /// One ciphertext per slot, in slot-position order.
    pub slots: Vec<Vec<u8>>,
    /// One encrypted, length-prefixed metadata entry per slot.
    pub metadata: Vec<Vec<u8>>,
}

/// Encodes a metadata entry as a 4-byte little-endian slot-position prefix
/// followed by the occupant id bytes, avoiding the ambiguity of naive
/// concatenation when occupant ids can themselves contain digits.
fn encode_metadata_entry(slot_position: SlotPosition, occupant_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + occupant_id.len());
    buf.write_u32::<LittleEndian>(slot_position)
        .expect("writing to a Vec<u8> cannot fail");
    buf.extend_from_slice(occupant_id.as_bytes());
    buf
}

/// Decodes a metadata entry produced by `encode_metadata_entry`.
fn decode_metadata_entry(buf: &[u8]) -> Result<(SlotPosition, String), OramError> {
    if buf.len() < 4 {
        return Err(OramError::InvariantViolation(
            "metadata entry shorter than the slot-position prefix".into(),
        ));
    }
    let slot_position = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let occupant_id = String::from_utf8(buf[4..].to_vec())
        .map_err(|_| OramError::InvariantViolation("metadata occupant id is not UTF-8".into()))?;
    Ok((slot_position, occupant_id))
}

/// Encrypts and decodes a stored metadata blob for one slot.
pub fn decrypt_metadata_entry(
    key: &ShardKey,
    ciphertext: &[u8],
) -> Result<(SlotPosition, String), OramError> {
    let plaintext = key.decrypt(ciphertext)?;
    decode_metadata_entry(&plaintext)
}

/// Rewrites a bucket from scratch: shuffles `real_blocks` (at most `Z` of
/// them) into a uniformly random permutation of the `Z+S` slots, fills the
/// rest with freshly synthesized dummies, and encrypts everything with a
/// fresh nonce per slot.
///
/// `real_blocks.len()` must be `<= params.z`; callers are responsible for
/// shedding excess blocks into the stash before calling this.
pub fn rewrite_bucket(
    key: &ShardKey,
    bucket_id: BucketId,
    real_blocks: &[(BlockId, BlockValue)],
    params: BucketParams,
) -> RewrittenBucket {
    debug_assert!(real_blocks.len() <= params.z);

    let total = params.total_slots();
    let mut order: Vec<usize> = (0..total).collect();
    order.shuffle(&mut rand::thread_rng());

    let mut slots = vec![Vec::new(); total];
    let mut metadata = vec![Vec::new(); total];

    for (i, (block_id, value)) in real_blocks.iter().enumerate() {
        let slot = order[i];
        slots[slot] = key.encrypt(value);
        let entry = encode_metadata_entry(slot as SlotPosition, block_id);
        metadata[slot] = key.encrypt(&entry);
    }

    for &slot in order.iter().skip(real_blocks.len()) {
        let dummy_label = format!("dummy{}", slot);
        let dummy_payload = crypto::synthesize_dummy(bucket_id, slot as u32);
        slots[slot] = key.encrypt(&dummy_payload);
        let entry = encode_metadata_entry(slot as SlotPosition, &dummy_label);
        metadata[slot] = key.encrypt(&entry);
    }

    RewrittenBucket { slots, metadata }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_preserves_all_real_blocks() {
        let key = ShardKey::generate();
        let params = BucketParams { z: 4, s: 6 };
        let blocks = vec![
            ("a".to_string(), b"va".to_vec()),
            ("b".to_string(), b"vb".to_vec()),
        ];
        let rewritten = rewrite_bucket(&key, 1, &blocks, params);
        assert_eq!(rewritten.slots.len(), 10);
        assert_eq!(rewritten.metadata.len(), 10);

        let mut found = std::collections::HashSet::new();
        for blob in &rewritten.metadata {
            let (_, occupant) = decrypt_metadata_entry(&key, blob).unwrap();
            if occupant == "a" || occupant == "b" {
                found.insert(occupant);
            }
        }
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn metadata_roundtrip() {
        let entry = encode_metadata_entry(7, "block-42");
        let (pos, id) = decode_metadata_entry(&entry).unwrap();
        assert_eq!(pos, 7);
        assert_eq!(id, "block-42");
    }
}
