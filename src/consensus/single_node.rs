//! Single-leader, in-process implementation of `RaftHandle`.
//!
//! Sufficient to drive and test every coordination invariant against the
//! FSM. A multi-node deployment swaps in a real consensus crate behind the
//! same trait without touching `OramNode`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::OramError;

use super::{LogEntry, OramFsm, RaftHandle};

const PROPOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SingleNodeRaftHandle {
    log: Mutex<Vec<LogEntry>>,
    applied_index: AtomicUsize,
    fsm: Arc<OramFsm>,
    apply_signal: Notify,
    applied_signal: Notify,
}

impl SingleNodeRaftHandle {
    /// Spawns the background apply loop and returns a handle shared by every
    /// caller of `propose`.
    pub fn new(fsm: Arc<OramFsm>, shutdown_token: CancellationToken) -> Arc<Self> {
        let handle = Arc::new(Self {
            log: Mutex::new(Vec::new()),
            applied_index: AtomicUsize::new(0),
            fsm,
            apply_signal: Notify::new(),
            applied_signal: Notify::new(),
        });

        let background = handle.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = background.apply_signal.notified() => {
                        background.drain_and_apply().await;
                    }
                }
            }
        });

        handle
    }

    async fn drain_and_apply(&self) {
        let pending: Vec<LogEntry> = {
            let log = self.log.lock().await;
            let applied = self.applied_index.load(Ordering::Acquire);
            log[applied..].to_vec()
        };
        for entry in &pending {
            self.fsm.apply(entry);
        }
        if !pending.is_empty() {
            self.applied_index.fetch_add(pending.len(), Ordering::AcqRel);
            self.applied_signal.notify_waiters();
        }
    }

    pub fn fsm(&self) -> Arc<OramFsm> {
        self.fsm.clone()
    }
}

#[async_trait]
impl RaftHandle for SingleNodeRaftHandle {
    async fn propose(&self, entry: LogEntry) -> Result<(), OramError> {
        let my_index = {
            let mut log = self.log.lock().await;
            log.push(entry);
            log.len()
        };
        self.apply_signal.notify_one();

        let wait_for_commit = async {
            loop {
                if self.applied_index.load(Ordering::Acquire) >= my_index {
                    return;
                }
                self.applied_signal.notified().await;
            }
        };

        timeout(PROPOSE_TIMEOUT, wait_for_commit)
            .await
            .map_err(|_| OramError::ConsensusTimeout)
    }

    fn is_leader(&self) -> bool {
        // Single-node deployment: this replica is always the leader.
        true
    }

    async fn add_voter(&self, _node_id: String, _address: String) -> Result<(), OramError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn propose_commits_before_returning() {
        let fsm = Arc::new(OramFsm::new());
        let handle = SingleNodeRaftHandle::new(fsm.clone(), CancellationToken::new());

        handle
            .propose(LogEntry::BeginReadPath {
                request_id: "r1".into(),
                offsets: vec![0, 1],
            })
            .await
            .unwrap();

        assert_eq!(fsm.offsets_for("r1"), Some(vec![0, 1]));
        assert!(handle.is_leader());
    }

    #[tokio::test]
    async fn sequential_proposals_apply_in_order() {
        let fsm = Arc::new(OramFsm::new());
        let handle = SingleNodeRaftHandle::new(fsm.clone(), CancellationToken::new());

        handle
            .propose(LogEntry::BeginEviction { path: 4, storage_id: 0 })
            .await
            .unwrap();
        assert!(fsm.eviction_in_progress(4, 0));

        handle
            .propose(LogEntry::EndEviction { path: 4, storage_id: 0 })
            .await
            .unwrap();
        assert!(!fsm.eviction_in_progress(4, 0));
    }
}
