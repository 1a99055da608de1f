//! DashMap-backed blob backend used by unit/integration tests and viable
//! for a single-process demo deployment.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::OramError;
use crate::model::{BucketId, Payload, SlotPosition};

use super::BlobBackend;

#[derive(Clone)]
struct BucketState {
    slots: Vec<Payload>,
    metadata: Vec<Vec<u8>>,
}

/// In-memory blob backend. Emulates `atomic_write_bucket` with a two-buffer
/// shadow/pointer flip rather than replacing state in place, matching the
/// backend contract real multi-key-transaction-less stores must follow.
pub struct InMemoryBlobBackend {
    /// `false` -> buffer A is live, `true` -> buffer B is live.
    live: DashMap<BucketId, bool>,
    buffer_a: DashMap<BucketId, BucketState>,
    buffer_b: DashMap<BucketId, BucketState>,
    counters: DashMap<BucketId, u32>,
}

impl InMemoryBlobBackend {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            buffer_a: DashMap::new(),
            buffer_b: DashMap::new(),
            counters: DashMap::new(),
        }
    }

    fn current_state(&self, bucket_id: BucketId) -> Option<BucketState> {
        let live_is_b = self.live.get(&bucket_id).map(|v| *v).unwrap_or(false);
        if live_is_b {
            self.buffer_b.get(&bucket_id).map(|s| s.clone())
        } else {
            self.buffer_a.get(&bucket_id).map(|s| s.clone())
        }
    }
}

impl Default for InMemoryBlobBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobBackend for InMemoryBlobBackend {
    async fn get_slot(&self, bucket_id: BucketId, slot: SlotPosition) -> Result<Payload, OramError> {
        match self.current_state(bucket_id) {
            Some(state) => Ok(state
                .slots
                .get(slot as usize)
                .cloned()
                .unwrap_or(Payload::Invalidated)),
            None => Ok(Payload::Invalidated),
        }
    }

    async fn put_slot(
        &self,
        bucket_id: BucketId,
        slot: SlotPosition,
        payload: Payload,
    ) -> Result<(), OramError> {
        let live_is_b = self.live.get(&bucket_id).map(|v| *v).unwrap_or(false);
        let buffer = if live_is_b { &self.buffer_b } else { &self.buffer_a };
        match buffer.get_mut(&bucket_id) {
            Some(mut state) => {
                if let Some(existing) = state.slots.get_mut(slot as usize) {
                    *existing = payload;
                }
                Ok(())
            }
            None => Err(OramError::NotFound),
        }
    }

    async fn atomic_write_bucket(
        &self,
        bucket_id: BucketId,
        slots: Vec<Vec<u8>>,
        metadata: Vec<Vec<u8>>,
    ) -> Result<(), OramError> {
        let payload_slots = slots.into_iter().map(Payload::Encrypted).collect();
        let new_state = BucketState {
            slots: payload_slots,
            metadata,
        };

        let live_is_b = self.live.get(&bucket_id).map(|v| *v).unwrap_or(false);
        if live_is_b {
            self.buffer_a.insert(bucket_id, new_state);
        } else {
            self.buffer_b.insert(bucket_id, new_state);
        }
        // Single pointer flip: the only step observers can race with.
        self.live.insert(bucket_id, !live_is_b);
        self.counters.insert(bucket_id, 0);
        Ok(())
    }

    async fn get_metadata(&self, bucket_id: BucketId, slot: SlotPosition) -> Result<Vec<u8>, OramError> {
        match self.current_state(bucket_id) {
            Some(state) => state
                .metadata
                .get(slot as usize)
                .cloned()
                .ok_or(OramError::NotFound),
            None => Err(OramError::NotFound),
        }
    }

    async fn get_counter(&self, bucket_id: BucketId) -> Result<u32, OramError> {
        Ok(self.counters.get(&bucket_id).map(|v| *v).unwrap_or(0))
    }

    async fn increment_counter(&self, bucket_id: BucketId) -> Result<u32, OramError> {
        let mut entry = self.counters.entry(bucket_id).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_bucket_reads_as_invalidated() {
        let backend = InMemoryBlobBackend::new();
        assert_eq!(backend.get_slot(1, 0).await.unwrap(), Payload::Invalidated);
        assert_eq!(backend.get_counter(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn atomic_write_then_read_back() {
        let backend = InMemoryBlobBackend::new();
        let slots = vec![b"ct0".to_vec(), b"ct1".to_vec()];
        let metadata = vec![b"m0".to_vec(), b"m1".to_vec()];
        backend.atomic_write_bucket(5, slots.clone(), metadata.clone()).await.unwrap();

        assert_eq!(backend.get_slot(5, 0).await.unwrap(), Payload::Encrypted(slots[0].clone()));
        assert_eq!(backend.get_metadata(5, 1).await.unwrap(), metadata[1]);
        assert_eq!(backend.get_counter(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counter_increments_independently_of_rewrites() {
        let backend = InMemoryBlobBackend::new();
        assert_eq!(backend.increment_counter(9).await.unwrap(), 1);
        assert_eq!(backend.increment_counter(9).await.unwrap(), 2);
        backend.atomic_write_bucket(9, vec![], vec![]).await.unwrap();
        assert_eq!(backend.get_counter(9).await.unwrap(), 0);
    }
}
