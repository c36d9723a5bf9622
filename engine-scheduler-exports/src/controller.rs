// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::commands::{ParentTx, SchedulerCommand, SchedulerStats};
use crate::error::SchedulerError;
use crate::lane::QueuedTx;
use engine_models::{EngineMessage, UniqueTxKey};
use engine_rpc_exports::{ChainStream, ChainStreamId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

/// Creates the scheduler mailbox.
///
/// The sender is handed to the components that feed the scheduler before the
/// scheduler itself is started, which breaks the wiring cycle with the
/// process manager.
pub fn scheduler_channel(
    channel_size: usize,
) -> (SchedulerCommandSender, mpsc::Receiver<SchedulerCommand>) {
    let (tx, rx) = mpsc::channel(channel_size);
    (SchedulerCommandSender(tx), rx)
}

/// Scheduler command sender
#[derive(Debug, Clone)]
pub struct SchedulerCommandSender(pub mpsc::Sender<SchedulerCommand>);

impl SchedulerCommandSender {
    async fn send(&self, cmd: SchedulerCommand, name: &str) -> Result<(), SchedulerError> {
        self.0
            .send(cmd)
            .await
            .map_err(|_| SchedulerError::ChannelError(format!("could not send {} command", name)))
    }

    /// submit a chain `TxRequest`
    pub async fn submit_tx(&self, msg: EngineMessage, stream: ChainStream) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::SubmitTx { msg, stream }, "SubmitTx")
            .await
    }

    /// forward a chain `GetByteCodeResp`
    pub async fn bytecode_response(&self, msg: EngineMessage) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::ByteCodeResponse(msg), "ByteCodeResponse")
            .await
    }

    /// forward a chain `GetStateResp` or `CreateKvIteratorResp`
    pub async fn state_response(&self, msg: EngineMessage) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::StateResponse(msg), "StateResponse")
            .await
    }

    /// report a closed chain stream
    pub async fn connection_stopped(
        &self,
        stream_id: ChainStreamId,
        chain_ids: Vec<String>,
    ) -> Result<(), SchedulerError> {
        self.send(
            SchedulerCommand::ConnectionStopped {
                stream_id,
                chain_ids,
            },
            "ConnectionStopped",
        )
        .await
    }

    /// report the outcome of a tx
    pub async fn tx_completed(&self, response: EngineMessage) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::TxCompleted(response), "TxCompleted")
            .await
    }

    /// Runs a cross-contract call; the receiver yields the callee outcome.
    pub async fn cross_call(
        &self,
        request: EngineMessage,
        parent: ParentTx,
    ) -> Result<oneshot::Receiver<EngineMessage>, SchedulerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(
            SchedulerCommand::CrossCall {
                request,
                parent,
                reply_tx,
            },
            "CrossCall",
        )
        .await?;
        Ok(reply_rx)
    }

    /// relay a sandbox state request to the root tx chain
    pub async fn state_request(
        &self,
        request: EngineMessage,
        root: UniqueTxKey,
        reply_tx: mpsc::Sender<EngineMessage>,
    ) -> Result<(), SchedulerError> {
        self.send(
            SchedulerCommand::StateRequest {
                request,
                root,
                reply_tx,
            },
            "StateRequest",
        )
        .await
    }

    /// resolve a sandbox bytecode request through the contract cache
    pub async fn bytecode_request(
        &self,
        request: EngineMessage,
        root: UniqueTxKey,
        reply_tx: mpsc::Sender<EngineMessage>,
    ) -> Result<(), SchedulerError> {
        self.send(
            SchedulerCommand::ByteCodeRequest {
                request,
                root,
                reply_tx,
            },
            "ByteCodeRequest",
        )
        .await
    }

    /// hand back a tx whose bytecode was refused
    pub async fn bad_contract(&self, tx: QueuedTx, reason: String) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::BadContract { tx, reason }, "BadContract")
            .await
    }

    /// load figures
    pub async fn get_stats(&self) -> Result<SchedulerStats, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(SchedulerCommand::GetStats(response_tx), "GetStats")
            .await?;
        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError("could not receive GetStats response".into())
        })
    }
}

/// Scheduler manager
pub struct SchedulerManager {
    /// scheduler handle
    pub join_handle: JoinHandle<Result<(), SchedulerError>>,
    /// management commands
    pub manager_tx: mpsc::Sender<()>,
}

impl SchedulerManager {
    /// Stops the scheduler. Pending txs are answered `Transient`.
    pub async fn stop(self) -> Result<(), SchedulerError> {
        info!("stopping scheduler...");
        drop(self.manager_tx);
        self.join_handle.await??;
        info!("scheduler stopped");
        Ok(())
    }
}
