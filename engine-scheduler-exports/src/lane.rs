// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_models::{ContractArtifact, ContractKey, EngineMessage, UniqueTxKey};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// A tx waiting in a lane, with the bytecode it was admitted against.
#[derive(Debug, Clone)]
pub struct QueuedTx {
    /// the `TxRequest`
    pub msg: EngineMessage,
    /// whether the tx came from the chain (origin lane) or from a sandbox (cross lane)
    pub is_orig: bool,
    /// bytecode published for the group when the tx was admitted
    pub artifact: ContractArtifact,
    /// admission time
    pub enqueued_at: Instant,
    /// the tx is answered `Timeout` past this instant
    pub deadline: Instant,
    /// chain-originated ancestor, whose stream relays state requests
    pub root: UniqueTxKey,
    /// bytecode refreshes already spent on this tx
    pub attempts: u32,
    /// cancelled by the scheduler once the tx has its completion
    pub cancel: CancellationToken,
}

impl QueuedTx {
    /// key of the tx
    pub fn key(&self) -> UniqueTxKey {
        self.msg.unique_tx_key()
    }

    /// whether the deadline passed
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// whether the tx was already answered and must not run
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Newest bytecode of a request group as seen by the processes serving it.
#[derive(Debug, Clone)]
pub struct LatestArtifact {
    /// the artifact
    pub artifact: ContractArtifact,
    /// txs admitted against an older artifact must not start after this instant
    pub stale_deadline: Option<Instant>,
}

/// Shared by both lanes of a request group. Written by the scheduler only.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCell(Arc<RwLock<Option<LatestArtifact>>>);

impl ArtifactCell {
    /// Publishes `artifact` if it is newer than the current one.
    /// Txs pinned to the previous artifact get `drain` to start.
    pub fn publish(&self, artifact: ContractArtifact, drain: Duration) -> bool {
        let mut latest = self.0.write();
        match latest.as_ref() {
            Some(current) if current.artifact.file_version >= artifact.file_version => false,
            Some(_) => {
                *latest = Some(LatestArtifact {
                    artifact,
                    stale_deadline: Instant::now().checked_add(drain),
                });
                true
            }
            None => {
                *latest = Some(LatestArtifact {
                    artifact,
                    stale_deadline: None,
                });
                true
            }
        }
    }

    /// current artifact, if any was published
    pub fn get(&self) -> Option<LatestArtifact> {
        self.0.read().clone()
    }
}

/// Bounded FIFO of a request group, shared by the processes serving it.
///
/// Pushes never wait: a full lane hands the tx back so the caller can answer
/// `Busy`. Pops are serialized through a fair async mutex, which keeps
/// dispatch order equal to push order.
#[derive(Debug, Clone)]
pub struct Lane {
    key: ContractKey,
    is_orig: bool,
    capacity: usize,
    sender: mpsc::Sender<QueuedTx>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedTx>>>,
    artifact: ArtifactCell,
}

impl Lane {
    /// New lane of `capacity` txs (at least one).
    pub fn new(key: ContractKey, is_orig: bool, capacity: usize, artifact: ArtifactCell) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Lane {
            key,
            is_orig,
            capacity,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            artifact,
        }
    }

    /// Appends a tx, giving it back when the lane is full.
    #[allow(clippy::result_large_err)]
    pub fn try_push(&self, tx: QueuedTx) -> Result<(), QueuedTx> {
        self.sender.try_send(tx).map_err(|e| match e {
            mpsc::error::TrySendError::Full(tx) | mpsc::error::TrySendError::Closed(tx) => tx,
        })
    }

    /// Oldest tx of the lane. Cancel safe.
    pub async fn pop(&self) -> Option<QueuedTx> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    /// number of queued txs
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }

    /// contract served by this lane
    pub fn key(&self) -> &ContractKey {
        &self.key
    }

    /// whether this is the origin lane of its group
    pub fn is_orig(&self) -> bool {
        self.is_orig
    }

    /// maximum number of queued txs
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// newest bytecode published for the group
    pub fn latest_artifact(&self) -> Option<LatestArtifact> {
        self.artifact.get()
    }
}
