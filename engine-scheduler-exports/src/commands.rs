// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::lane::QueuedTx;
use engine_models::{EngineMessage, UniqueTxKey};
use engine_rpc_exports::{ChainStream, ChainStreamId};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Where the completion of a tx goes. Invoked exactly once, then dropped.
#[derive(Debug)]
pub enum TxNotifier {
    /// chain-originated tx: the `TxResponse` is written on the chain stream
    Chain(ChainStream),
    /// cross-contract child: the outcome goes back to the calling sandbox
    Caller(oneshot::Sender<EngineMessage>),
}

/// The tx making a cross-contract call.
#[derive(Debug, Clone)]
pub struct ParentTx {
    /// calling tx
    pub key: UniqueTxKey,
    /// its chain-originated ancestor
    pub root: UniqueTxKey,
    /// its nesting level
    pub call_depth: u32,
    /// its deadline, inherited by the child
    pub deadline: Instant,
}

/// Load figures of the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// live request groups
    pub request_groups: usize,
    /// txs with a registered notifier
    pub inflight_txs: usize,
    /// txs waiting in lanes or for their bytecode
    pub queued_txs: usize,
}

/// Commands that the scheduler worker handles
#[derive(Debug)]
pub enum SchedulerCommand {
    /// `TxRequest` from a chain
    SubmitTx {
        /// the request
        msg: EngineMessage,
        /// stream it arrived on, answers go back there
        stream: ChainStream,
    },
    /// `GetByteCodeResp` from a chain
    ByteCodeResponse(EngineMessage),
    /// `GetStateResp` or `CreateKvIteratorResp` from a chain
    StateResponse(EngineMessage),
    /// a chain stream closed
    ConnectionStopped {
        /// the stream
        stream_id: ChainStreamId,
        /// chains that submitted txs on it
        chain_ids: Vec<String>,
    },
    /// a process finished a tx
    TxCompleted(EngineMessage),
    /// `CallContractReq` from a running sandbox
    CrossCall {
        /// the request, naming the callee
        request: EngineMessage,
        /// the calling tx
        parent: ParentTx,
        /// receives the callee outcome
        reply_tx: oneshot::Sender<EngineMessage>,
    },
    /// `GetStateReq` or `CreateKvIteratorReq` from a running sandbox
    StateRequest {
        /// the request
        request: EngineMessage,
        /// chain-originated ancestor of the requesting tx
        root: UniqueTxKey,
        /// receives the chain answer
        reply_tx: mpsc::Sender<EngineMessage>,
    },
    /// `GetByteCodeReq` from a running sandbox
    ByteCodeRequest {
        /// the request
        request: EngineMessage,
        /// chain-originated ancestor of the requesting tx
        root: UniqueTxKey,
        /// receives a `GetByteCodeResp` carrying the bytecode path
        reply_tx: mpsc::Sender<EngineMessage>,
    },
    /// the sandbox refused the bytecode a tx was dispatched with
    BadContract {
        /// the tx, to requeue once the bytecode is refreshed
        tx: QueuedTx,
        /// sandbox report
        reason: String,
    },
    /// load figures
    GetStats(oneshot::Sender<SchedulerStats>),
}
