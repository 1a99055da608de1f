//! Replicated log of per-request offset lists and eviction markers.
//!
//! The original implementation treats Raft consensus as an external library
//! dependency and implements only the application-level FSM and log
//! commands on top of it. This follows the same division of labour: a small
//! `RaftHandle` trait stands in the place the original's `*raft.Raft` handle
//! occupies, and `OramFsm` is the only code that interprets committed
//! entries.

pub mod single_node;

pub use single_node::SingleNodeRaftHandle;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::OramError;
use crate::model::{Path, RequestId, StorageId};

/// A committed or proposed log entry. Byte-exact (`serde_json`-encoded) as
/// proposed to the log, tagged so the FSM can dispatch on `tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum LogEntry {
    BeginReadPath {
        request_id: RequestId,
        offsets: Vec<i64>,
    },
    DeleteOffsetList {
        request_id: RequestId,
    },
    BeginEviction {
        path: Path,
        storage_id: StorageId,
    },
    EndEviction {
        path: Path,
        storage_id: StorageId,
    },
    CancelEviction {
        path: Path,
        storage_id: StorageId,
    },
}

/// Handle to the replicated log. `propose` mirrors a single round-trip Raft
/// apply call; `is_leader` mirrors `raft.State() != raft.Leader`;
/// `add_voter` mirrors `JoinRaftVoter`.
#[async_trait]
pub trait RaftHandle: Send + Sync {
    /// Commits `entry` and returns once the FSM has observed it.
    async fn propose(&self, entry: LogEntry) -> Result<(), OramError>;

    /// Whether this replica currently believes itself the leader.
    fn is_leader(&self) -> bool;

    /// Adds a new voter to the consensus group (cluster bootstrap / join).
    async fn add_voter(&self, node_id: String, address: String) -> Result<(), OramError>;
}

/// Application-level state machine: a map from `request_id` to offset list,
/// plus an eviction-in-progress marker per `(path, storage_id)`. This is the
/// only state consensus protects; bucket blobs live in the backend and are
/// idempotently overwritten on recovery.
#[derive(Default)]
pub struct OramFsm {
    offset_lists: DashMap<RequestId, Vec<i64>>,
    evictions_in_progress: DashMap<(Path, StorageId), ()>,
}

impl OramFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one committed entry. Called by the `RaftHandle` implementation
    /// as entries commit, in log order, on every replica.
    pub fn apply(&self, entry: &LogEntry) {
        match entry {
            LogEntry::BeginReadPath { request_id, offsets } => {
                self.offset_lists.insert(request_id.clone(), offsets.clone());
            }
            LogEntry::DeleteOffsetList { request_id } => {
                self.offset_lists.remove(request_id);
            }
            LogEntry::BeginEviction { path, storage_id } => {
                self.evictions_in_progress.insert((*path, *storage_id), ());
            }
            LogEntry::EndEviction { path, storage_id }
            | LogEntry::CancelEviction { path, storage_id } => {
                self.evictions_in_progress.remove(&(*path, *storage_id));
            }
        }
    }

    pub fn offsets_for(&self, request_id: &str) -> Option<Vec<i64>> {
        self.offset_lists.get(request_id).map(|v| v.clone())
    }

    pub fn eviction_in_progress(&self, path: Path, storage_id: StorageId) -> bool {
        self.evictions_in_progress.contains_key(&(path, storage_id))
    }

    /// Replays a sequence of entries from scratch, used by tests to check
    /// that replaying any log prefix yields a state consistent with some
    /// serial execution of the committed requests.
    pub fn replay(entries: &[LogEntry]) -> Self {
        let fsm = Self::new();
        for entry in entries {
            fsm.apply(entry);
        }
        fsm
    }
}

/// Snapshot of FSM state, useful for tests asserting on replay determinism.
pub struct FsmSnapshot {
    pub offset_lists: HashMap<RequestId, Vec<i64>>,
    pub evictions_in_progress: HashSet<(Path, StorageId)>,
}

impl OramFsm {
    pub fn snapshot(&self) -> FsmSnapshot {
        FsmSnapshot {
            offset_lists: self
                .offset_lists
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            evictions_in_progress: self
                .evictions_in_progress
                .iter()
                .map(|e| *e.key())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_and_delete_offset_list() {
        let fsm = OramFsm::new();
        fsm.apply(&LogEntry::BeginReadPath {
            request_id: "r1".into(),
            offsets: vec![0, 3, -1],
        });
        assert_eq!(fsm.offsets_for("r1"), Some(vec![0, 3, -1]));
        fsm.apply(&LogEntry::DeleteOffsetList {
            request_id: "r1".into(),
        });
        assert_eq!(fsm.offsets_for("r1"), None);
    }

    #[test]
    fn eviction_markers_track_progress() {
        let fsm = OramFsm::new();
        assert!(!fsm.eviction_in_progress(12, 0));
        fsm.apply(&LogEntry::BeginEviction { path: 12, storage_id: 0 });
        assert!(fsm.eviction_in_progress(12, 0));
        fsm.apply(&LogEntry::EndEviction { path: 12, storage_id: 0 });
        assert!(!fsm.eviction_in_progress(12, 0));
    }

    #[test]
    fn replay_from_prefix_is_deterministic() {
        let entries = vec![
            LogEntry::BeginReadPath {
                request_id: "r1".into(),
                offsets: vec![1, 2],
            },
            LogEntry::BeginEviction { path: 4, storage_id: 0 },
            LogEntry::DeleteOffsetList {
                request_id: "r1".into(),
            },
        ];
        let a = OramFsm::replay(&entries);
        let b = OramFsm::replay(&entries);
        assert_eq!(a.snapshot().evictions_in_progress, b.snapshot().evictions_in_progress);
        assert_eq!(a.offsets_for("r1"), b.offsets_for("r1"));
    }
}
