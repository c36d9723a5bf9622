// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_models::{ContractArtifact, ContractKey, EngineMessage, UniqueTxKey};
use engine_scheduler_exports::{ArtifactCell, Lane, QueuedTx};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A tx admitted before its bytecode is available.
#[derive(Debug)]
pub(crate) struct WaitingTx {
    pub msg: EngineMessage,
    pub is_orig: bool,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    pub root: UniqueTxKey,
    pub attempts: u32,
    pub cancel: CancellationToken,
}

impl WaitingTx {
    pub fn into_queued(self, artifact: ContractArtifact) -> QueuedTx {
        let mut msg = self.msg;
        msg.file_version = artifact.file_version;
        QueuedTx {
            msg,
            is_orig: self.is_orig,
            artifact,
            enqueued_at: self.enqueued_at,
            deadline: self.deadline,
            root: self.root,
            attempts: self.attempts,
            cancel: self.cancel,
        }
    }
}

/// Queues of one contract key.
///
/// Both lanes are bounded by `queue_size`, and so is the number of txs of each
/// lane parked while the bytecode is fetched.
pub(crate) struct RequestGroup {
    orig_lane: Lane,
    cross_lane: Lane,
    artifact_cell: ArtifactCell,
    /// version demanded by the txs admitted so far
    pub contract_file_version: i64,
    /// a bytecode fetch is in flight
    pub fetching: bool,
    /// txs waiting for bytecode, in admission order
    pub waiting: VecDeque<WaitingTx>,
    queue_size: usize,
    empty_since: Option<Instant>,
}

impl RequestGroup {
    pub fn new(key: ContractKey, queue_size: usize) -> Self {
        let artifact_cell = ArtifactCell::default();
        RequestGroup {
            orig_lane: Lane::new(key.clone(), true, queue_size, artifact_cell.clone()),
            cross_lane: Lane::new(key, false, queue_size, artifact_cell.clone()),
            artifact_cell,
            contract_file_version: 0,
            fetching: false,
            waiting: VecDeque::new(),
            queue_size: queue_size.max(1),
            empty_since: None,
        }
    }

    /// newest published bytecode
    pub fn artifact(&self) -> Option<ContractArtifact> {
        self.artifact_cell.get().map(|latest| latest.artifact)
    }

    /// Publishes a refreshed bytecode; txs pinned to the previous one get `drain` to start.
    pub fn publish(&mut self, artifact: ContractArtifact, drain: Duration) -> bool {
        self.contract_file_version = self.contract_file_version.max(artifact.file_version);
        self.artifact_cell.publish(artifact, drain)
    }

    pub fn demand_version(&mut self, contract_index: i64) {
        self.contract_file_version = self.contract_file_version.max(contract_index);
    }

    /// Appends to the lane of the tx, handing it back when full.
    #[allow(clippy::result_large_err)]
    pub fn enqueue(&mut self, tx: QueuedTx) -> Result<(), QueuedTx> {
        self.empty_since = None;
        self.get_tx_ch(tx.is_orig).try_push(tx)
    }

    /// Parks a tx until the bytecode arrives, handing it back when its lane is full.
    pub fn park(&mut self, tx: WaitingTx) -> Result<(), WaitingTx> {
        let parked = self
            .waiting
            .iter()
            .filter(|w| w.is_orig == tx.is_orig)
            .count();
        if parked >= self.queue_size {
            return Err(tx);
        }
        self.empty_since = None;
        self.waiting.push_back(tx);
        Ok(())
    }

    /// consumer handle of a lane
    pub fn get_tx_ch(&self, is_orig: bool) -> &Lane {
        if is_orig {
            &self.orig_lane
        } else {
            &self.cross_lane
        }
    }

    /// queued txs of a lane
    pub fn demand(&self, is_orig: bool) -> usize {
        self.get_tx_ch(is_orig).depth()
    }

    /// queued and parked txs of both lanes
    pub fn queued(&self) -> usize {
        self.orig_lane.depth() + self.cross_lane.depth() + self.waiting.len()
    }

    /// True once both lanes and the parking queue have been empty for `grace`.
    pub fn idle(&mut self, grace: Duration, now: Instant) -> bool {
        if self.queued() > 0 || self.fetching {
            self.empty_since = None;
            return false;
        }
        let since = *self.empty_since.get_or_insert(now);
        now.saturating_duration_since(since) >= grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_models::MessageType;
    use std::path::PathBuf;

    fn key() -> ContractKey {
        ContractKey::new("chain1", "counter", "v1").unwrap()
    }

    fn waiting(tx_id: &str, is_orig: bool) -> WaitingTx {
        let now = Instant::now();
        WaitingTx {
            msg: EngineMessage::new(MessageType::TxRequest, "chain1", tx_id).with_contract(&key()),
            is_orig,
            enqueued_at: now,
            deadline: now + Duration::from_secs(5),
            root: UniqueTxKey::new("chain1", tx_id),
            attempts: 0,
            cancel: CancellationToken::new(),
        }
    }

    fn artifact(version: i64) -> ContractArtifact {
        ContractArtifact {
            key: key(),
            path: PathBuf::from("/cache/chain1/counter#v1#1"),
            file_version: version,
        }
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut group = RequestGroup::new(key(), 2);
        for i in 0..2 {
            group
                .enqueue(waiting(&format!("O{}", i), true).into_queued(artifact(1)))
                .unwrap();
        }
        assert!(group
            .enqueue(waiting("O2", true).into_queued(artifact(1)))
            .is_err());
        // a full origin lane does not block cross traffic
        group
            .enqueue(waiting("C0", false).into_queued(artifact(1)))
            .unwrap();
        assert_eq!(group.demand(true), 2);
        assert_eq!(group.demand(false), 1);
        assert_eq!(group.queued(), 3);
    }

    #[test]
    fn test_parking_is_bounded_per_lane() {
        let mut group = RequestGroup::new(key(), 1);
        group.park(waiting("O0", true)).unwrap();
        assert!(group.park(waiting("O1", true)).is_err());
        group.park(waiting("C0", false)).unwrap();
        assert_eq!(group.queued(), 2);
    }

    #[tokio::test]
    async fn test_idle_after_grace() {
        let mut group = RequestGroup::new(key(), 2);
        let start = Instant::now();
        group
            .enqueue(waiting("O0", true).into_queued(artifact(1)))
            .unwrap();
        assert!(!group.idle(Duration::ZERO, start));
        group.get_tx_ch(true).pop().await.unwrap();
        assert!(!group.idle(Duration::from_millis(100), start));
        assert!(!group.idle(Duration::from_millis(100), start + Duration::from_millis(50)));
        assert!(group.idle(Duration::from_millis(100), start + Duration::from_millis(100)));
    }

    #[test]
    fn test_version_demand_is_monotonic() {
        let mut group = RequestGroup::new(key(), 2);
        group.demand_version(3);
        group.demand_version(1);
        assert_eq!(group.contract_file_version, 3);
        assert!(group.publish(artifact(4), Duration::from_secs(1)));
        assert_eq!(group.contract_file_version, 4);
        assert!(!group.publish(artifact(2), Duration::from_secs(1)));
        assert_eq!(group.artifact().unwrap().file_version, 4);
        let queued = waiting("O0", true).into_queued(group.artifact().unwrap());
        assert_eq!(queued.msg.file_version, 4);
    }
}
