// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::RpcError;
use engine_models::EngineMessage;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Identifier of a connected chain stream, unique over the manager lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainStreamId(pub u64);

impl fmt::Display for ChainStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-stream-{}", self.0)
    }
}

/// Handle to the single writer task of a chain stream.
/// Every component writing to the chain goes through a clone of it.
#[derive(Debug, Clone)]
pub struct ChainStream {
    id: ChainStreamId,
    sender: mpsc::Sender<EngineMessage>,
}

impl ChainStream {
    /// Wraps the inbound channel of a writer task.
    pub fn new(id: ChainStreamId, sender: mpsc::Sender<EngineMessage>) -> Self {
        ChainStream { id, sender }
    }

    /// id of the stream
    pub fn id(&self) -> ChainStreamId {
        self.id
    }

    /// whether the writer task is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queues a message without waiting, handing it back on failure.
    pub fn try_queue(&self, msg: EngineMessage) -> Result<(), TrySendError<EngineMessage>> {
        self.sender.try_send(msg)
    }

    /// Queues a message without waiting.
    pub fn try_send(&self, msg: EngineMessage) -> Result<(), RpcError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                warn!(
                    "{} writer queue full, could not send {} for tx {}",
                    self.id,
                    msg.msg_type().as_str_name(),
                    msg.tx_id
                );
                Err(RpcError::ChannelError(format!(
                    "{} writer queue full",
                    self.id
                )))
            }
            Err(TrySendError::Closed(_)) => Err(RpcError::ChannelError(format!(
                "{} writer closed",
                self.id
            ))),
        }
    }

    /// Queues a message, waiting for room in the writer queue.
    pub async fn send(&self, msg: EngineMessage) -> Result<(), RpcError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| RpcError::ChannelError(format!("{} writer closed", self.id)))
    }

    /// Resolves once the writer task has stopped reading.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}
