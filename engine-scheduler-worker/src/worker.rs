// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::request_group::{RequestGroup, WaitingTx};
use engine_contract_cache::{ByteCodeOrigin, ContractCacheController, ContractCacheError};
use engine_logging::engine_trace;
use engine_models::constants::ORIGIN_CALL_DEPTH;
use engine_models::{
    ContractArtifact, ContractKey, EngineMessage, MessageType, TxStatus, UniqueTxKey,
};
use engine_process_exports::{EngineEvent, PoolCensus, ProcessManagerCommandSender};
use engine_rpc_exports::{ChainStream, ChainStreamId};
use engine_scheduler_exports::{
    ParentTx, QueuedTx, SchedulerCommand, SchedulerConfig, SchedulerError, SchedulerStats,
    TxNotifier,
};
use engine_time::EngineTime;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A tx whose outcome has not been delivered yet.
struct InflightTx {
    notifier: TxNotifier,
    /// the request without payload, to build responses from
    header: EngineMessage,
    deadline: Instant,
    root: UniqueTxKey,
    /// set for chain-originated txs
    stream_id: Option<ChainStreamId>,
    /// shared with the queued copy of the tx
    cancel: CancellationToken,
}

/// Results of the tasks the worker spawns.
enum InternalEvent {
    ContractReady {
        key: ContractKey,
        result: Result<ContractArtifact, ContractCacheError>,
    },
    Requeue {
        tx: QueuedTx,
        result: Result<ContractArtifact, ContractCacheError>,
    },
}

/// Outcome of a fetch, as a tx status.
fn fetch_status(err: &ContractCacheError) -> TxStatus {
    match err {
        ContractCacheError::FetchFailed(_) => TxStatus::Fail,
        _ => TxStatus::Transient,
    }
}

fn state_response_type(request: &EngineMessage) -> MessageType {
    match request.msg_type() {
        MessageType::CreateKvIteratorReq => MessageType::CreateKvIteratorResp,
        _ => MessageType::GetStateResp,
    }
}

fn root_stream(inflight: &HashMap<UniqueTxKey, InflightTx>, root: &UniqueTxKey) -> Option<ChainStream> {
    match inflight.get(root).map(|tx| &tx.notifier) {
        Some(TxNotifier::Chain(stream)) if !stream.is_closed() => Some(stream.clone()),
        _ => None,
    }
}

pub(crate) struct SchedulerWorker {
    cfg: SchedulerConfig,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    manager_rx: mpsc::Receiver<()>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    process_manager: ProcessManagerCommandSender,
    contract_cache: ContractCacheController,
    census: PoolCensus,
    groups: HashMap<ContractKey, RequestGroup>,
    inflight: HashMap<UniqueTxKey, InflightTx>,
    state_waiters: HashMap<UniqueTxKey, mpsc::Sender<EngineMessage>>,
    /// ordered overflow of chain streams whose writer queue filled up
    forwarders: HashMap<ChainStreamId, mpsc::UnboundedSender<EngineMessage>>,
    child_seq: u64,
}

impl SchedulerWorker {
    pub fn new(
        cfg: SchedulerConfig,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        manager_rx: mpsc::Receiver<()>,
        process_manager: ProcessManagerCommandSender,
        contract_cache: ContractCacheController,
        census: PoolCensus,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(cfg.channel_size);
        SchedulerWorker {
            cfg,
            command_rx,
            manager_rx,
            internal_tx,
            internal_rx,
            process_manager,
            contract_cache,
            census,
            groups: HashMap::new(),
            inflight: HashMap::new(),
            state_waiters: HashMap::new(),
            forwarders: HashMap::new(),
            child_seq: 0,
        }
    }

    pub async fn run_loop(mut self) -> Result<(), SchedulerError> {
        let mut sweep = tokio::time::interval(
            self.cfg
                .sweep_interval
                .to_duration()
                .max(Duration::from_millis(1)),
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                // sweep before commands: deadlines must fire under sustained load
                biased;
                _ = self.manager_rx.recv() => break,
                Some(event) = self.internal_rx.recv() => self.on_internal_event(event),
                _ = sweep.tick() => self.on_sweep(),
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
            }
        }
        let pending: Vec<UniqueTxKey> = self.inflight.keys().cloned().collect();
        for key in pending {
            self.fail_inflight(&key, TxStatus::Transient, "scheduler stopping");
        }
        Ok(())
    }

    async fn on_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::SubmitTx { msg, stream } => self.on_submit_tx(msg, stream),
            SchedulerCommand::ByteCodeResponse(msg) => {
                if let Err(e) = self.contract_cache.on_bytecode_response(msg).await {
                    warn!("could not forward GetByteCodeResp: {}", e);
                }
            }
            SchedulerCommand::StateResponse(msg) => self.on_state_response(msg),
            SchedulerCommand::ConnectionStopped {
                stream_id,
                chain_ids,
            } => self.on_connection_stopped(stream_id, chain_ids),
            SchedulerCommand::TxCompleted(response) => {
                self.complete(response);
            }
            SchedulerCommand::CrossCall {
                request,
                parent,
                reply_tx,
            } => self.on_cross_call(request, parent, reply_tx),
            SchedulerCommand::StateRequest {
                request,
                root,
                reply_tx,
            } => self.on_state_request(request, root, reply_tx),
            SchedulerCommand::ByteCodeRequest {
                request,
                root,
                reply_tx,
            } => self.on_bytecode_request(request, root, reply_tx),
            SchedulerCommand::BadContract { tx, reason } => self.on_bad_contract(tx, reason),
            SchedulerCommand::GetStats(response_tx) => {
                let _ = response_tx.send(self.stats());
            }
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            request_groups: self.groups.len(),
            inflight_txs: self.inflight.len(),
            queued_txs: self.groups.values().map(|g| g.queued()).sum(),
        }
    }

    fn on_submit_tx(&mut self, mut msg: EngineMessage, stream: ChainStream) {
        if msg.tx_id.is_empty() {
            self.deliver(&stream, msg.tx_response(TxStatus::ProtocolError, "missing tx id"));
            return;
        }
        if let Err(e) = msg.contract_key() {
            self.deliver(&stream, msg.tx_response(TxStatus::ProtocolError, e.to_string()));
            return;
        }
        let key = msg.unique_tx_key();
        if self.inflight.contains_key(&key) {
            debug!("rejecting duplicate tx {}", key);
            self.deliver(&stream, msg.tx_response(TxStatus::Fail, "duplicate tx id"));
            return;
        }
        msg.call_depth = ORIGIN_CALL_DEPTH;
        let timeout = if msg.timeout_ms > 0 {
            EngineTime::from_millis(msg.timeout_ms)
        } else {
            self.cfg.default_tx_timeout
        };
        let now = Instant::now();
        let deadline = timeout.deadline_from(now);
        engine_trace!("scheduler.submit_tx", { "tx": key.to_string(), "contract": msg.contract_name.clone() });

        let cancel = CancellationToken::new();
        self.inflight.insert(
            key.clone(),
            InflightTx {
                notifier: TxNotifier::Chain(stream.clone()),
                header: msg.header(),
                deadline,
                root: key.clone(),
                stream_id: Some(stream.id()),
                cancel: cancel.clone(),
            },
        );
        self.admit(WaitingTx {
            msg,
            is_orig: true,
            enqueued_at: now,
            deadline,
            root: key,
            attempts: 0,
            cancel,
        });
    }

    /// Puts a registered tx on its lane, or parks it until its bytecode is fetched.
    fn admit(&mut self, tx: WaitingTx) {
        let key = match tx.msg.contract_key() {
            Ok(key) => key,
            Err(e) => {
                self.complete(tx.msg.tx_response(TxStatus::ProtocolError, e.to_string()));
                return;
            }
        };
        let is_orig = tx.is_orig;
        let queue_size = self.cfg.queue_size;
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| RequestGroup::new(key.clone(), queue_size));
        group.demand_version(tx.msg.contract_index);

        match group.artifact() {
            Some(artifact) if artifact.serves(tx.msg.contract_index) => {
                match group.enqueue(tx.into_queued(artifact)) {
                    Ok(()) => self.signal_demand(&key, is_orig),
                    Err(rejected) => self.reject_busy(&rejected.msg, "request queue full"),
                }
            }
            _ => match group.park(tx) {
                Ok(()) => self.ensure_fetch(&key),
                Err(rejected) => self.reject_busy(&rejected.msg, "request queue full"),
            },
        }
    }

    fn reject_busy(&mut self, msg: &EngineMessage, reason: &str) {
        debug!("tx {} rejected: {}", msg.unique_tx_key(), reason);
        self.complete(msg.tx_response(TxStatus::Busy, reason));
    }

    /// Tells the process manager how many txs of a lane wait for a process.
    fn signal_demand(&self, key: &ContractKey, is_orig: bool) {
        let Some(group) = self.groups.get(key) else {
            return;
        };
        let want_n = group.demand(is_orig);
        if want_n == 0 {
            return;
        }
        let Some(artifact) = group.artifact() else {
            return;
        };
        if let Err(e) = self.process_manager.request_processes(
            key.clone(),
            is_orig,
            want_n,
            group.get_tx_ch(is_orig).clone(),
            artifact,
        ) {
            warn!("could not signal demand of {}: {}", key, e);
        }
    }

    /// Starts a bytecode fetch for the parked txs of a group, unless one is running.
    fn ensure_fetch(&mut self, key: &ContractKey) {
        let Some(group) = self.groups.get_mut(key) else {
            return;
        };
        if group.fetching || group.waiting.is_empty() {
            return;
        }
        let origin = group.waiting.iter().find_map(|w| {
            root_stream(&self.inflight, &w.root).map(|stream| ByteCodeOrigin {
                tx_key: w.msg.unique_tx_key(),
                stream,
            })
        });
        let Some(origin) = origin else {
            let orphans: Vec<EngineMessage> = group.waiting.drain(..).map(|w| w.msg).collect();
            for msg in orphans {
                self.complete(msg.tx_response(TxStatus::Transient, "chain stream closed"));
            }
            return;
        };
        group.fetching = true;
        let min_file_version = group.contract_file_version;
        let cache = self.contract_cache.clone();
        let internal_tx = self.internal_tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = cache.get_contract(key.clone(), min_file_version, origin).await;
            let _ = internal_tx
                .send(InternalEvent::ContractReady { key, result })
                .await;
        });
    }

    fn on_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ContractReady { key, result } => self.on_contract_ready(key, result),
            InternalEvent::Requeue { tx, result } => self.on_requeue(tx, result),
        }
    }

    fn on_contract_ready(
        &mut self,
        key: ContractKey,
        result: Result<ContractArtifact, ContractCacheError>,
    ) {
        let drain = self.cfg.stale_drain_timeout.to_duration();
        let Some(group) = self.groups.get_mut(&key) else {
            return;
        };
        group.fetching = false;
        let artifact = match result {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("bytecode of {} unavailable: {}", key, e);
                let failed: Vec<EngineMessage> = group.waiting.drain(..).map(|w| w.msg).collect();
                for msg in failed {
                    self.complete(
                        msg.tx_response(fetch_status(&e), format!("bytecode unavailable: {}", e)),
                    );
                }
                return;
            }
        };
        if group.publish(artifact.clone(), drain) {
            info!("{} now at bytecode version {}", key, artifact.file_version);
        }
        let latest = group.artifact().unwrap_or(artifact);

        let now = Instant::now();
        let mut rejected = Vec::new();
        let mut still_waiting = std::collections::VecDeque::new();
        for tx in std::mem::take(&mut group.waiting) {
            if tx.deadline <= now {
                // answered by the sweep
                continue;
            }
            if latest.serves(tx.msg.contract_index) {
                if let Err(tx) = group.enqueue(tx.into_queued(latest.clone())) {
                    rejected.push(tx.msg);
                }
            } else {
                still_waiting.push_back(tx);
            }
        }
        group.waiting = still_waiting;

        for msg in rejected {
            self.reject_busy(&msg, "request queue full");
        }
        self.signal_demand(&key, true);
        self.signal_demand(&key, false);
        self.ensure_fetch(&key);
    }

    fn on_cross_call(
        &mut self,
        request: EngineMessage,
        parent: ParentTx,
        reply_tx: oneshot::Sender<EngineMessage>,
    ) {
        let call_depth = parent.call_depth.saturating_add(1);
        if call_depth > self.cfg.call_contract_depth {
            info!(
                "tx {} call to {} rejected at depth {}",
                parent.key, request.contract_name, call_depth
            );
            let _ = reply_tx.send(request.tx_response(
                TxStatus::CallDepthExceeded,
                format!(
                    "call depth {} exceeds the limit of {}",
                    call_depth, self.cfg.call_contract_depth
                ),
            ));
            return;
        }
        if !self.inflight.contains_key(&parent.key) {
            let _ = reply_tx.send(
                request.tx_response(TxStatus::Transient, "calling tx no longer in flight"),
            );
            return;
        }

        self.child_seq += 1;
        let mut child = request;
        if child.chain_id.is_empty() {
            child.chain_id = parent.key.chain_id.clone();
        }
        child.tx_id = parent.key.child(self.child_seq).tx_id;
        child.set_msg_type(MessageType::TxRequest);
        child.call_depth = call_depth;
        let child_key = child.unique_tx_key();
        engine_trace!("scheduler.cross_call", { "parent": parent.key.to_string(), "child": child_key.to_string(), "depth": call_depth });

        let cancel = CancellationToken::new();
        self.inflight.insert(
            child_key,
            InflightTx {
                notifier: TxNotifier::Caller(reply_tx),
                header: child.header(),
                deadline: parent.deadline,
                root: parent.root.clone(),
                stream_id: None,
                cancel: cancel.clone(),
            },
        );
        self.admit(WaitingTx {
            msg: child,
            is_orig: false,
            enqueued_at: Instant::now(),
            deadline: parent.deadline,
            root: parent.root,
            attempts: 0,
            cancel,
        });
    }

    fn on_state_request(
        &mut self,
        request: EngineMessage,
        root: UniqueTxKey,
        reply_tx: mpsc::Sender<EngineMessage>,
    ) {
        let resp_type = state_response_type(&request);
        let Some(stream) = root_stream(&self.inflight, &root) else {
            let _ = reply_tx.try_send(request.response(
                resp_type,
                TxStatus::Transient,
                "chain stream closed",
            ));
            return;
        };
        let key = request.unique_tx_key();
        self.state_waiters.insert(key.clone(), reply_tx);
        if let Err(e) = stream.try_send(request.clone()) {
            if let Some(waiter) = self.state_waiters.remove(&key) {
                let _ = waiter.try_send(request.response(resp_type, TxStatus::Transient, e.to_string()));
            }
        }
    }

    /// Routes a state answer to its tx. The waiter stays registered until the
    /// tx completes since a process may have several requests outstanding.
    fn on_state_response(&mut self, msg: EngineMessage) {
        match self.state_waiters.get(&msg.unique_tx_key()) {
            Some(waiter) => {
                if waiter.try_send(msg).is_err() {
                    debug!("state requester gone");
                }
            }
            None => debug!(
                "dropping {} without waiter for tx {}",
                msg.msg_type().as_str_name(),
                msg.unique_tx_key()
            ),
        }
    }

    fn on_bytecode_request(
        &mut self,
        request: EngineMessage,
        root: UniqueTxKey,
        reply_tx: mpsc::Sender<EngineMessage>,
    ) {
        let key = match request.contract_key() {
            Ok(key) => key,
            Err(e) => {
                let _ = reply_tx.try_send(request.response(
                    MessageType::GetByteCodeResp,
                    TxStatus::ProtocolError,
                    e.to_string(),
                ));
                return;
            }
        };
        let Some(stream) = root_stream(&self.inflight, &root) else {
            let _ = reply_tx.try_send(request.response(
                MessageType::GetByteCodeResp,
                TxStatus::Transient,
                "chain stream closed",
            ));
            return;
        };
        let origin = ByteCodeOrigin {
            tx_key: request.unique_tx_key(),
            stream,
        };
        let cache = self.contract_cache.clone();
        tokio::spawn(async move {
            let resp = match cache.get_contract(key, request.contract_index, origin).await {
                Ok(artifact) => {
                    let mut resp = request
                        .response(MessageType::GetByteCodeResp, TxStatus::Ok, "")
                        .with_payload(artifact.path.to_string_lossy().into_owned().into_bytes());
                    resp.file_version = artifact.file_version;
                    resp
                }
                Err(e) => {
                    request.response(MessageType::GetByteCodeResp, fetch_status(&e), e.to_string())
                }
            };
            let _ = reply_tx.send(resp).await;
        });
    }

    fn on_bad_contract(&mut self, tx: QueuedTx, reason: String) {
        let key = tx.key();
        if !self.inflight.contains_key(&key) {
            return;
        }
        if tx.attempts >= self.cfg.bad_contract_retry_limit {
            warn!("tx {} bytecode refresh retries exhausted: {}", key, reason);
            self.complete(tx.msg.tx_response(
                TxStatus::Transient,
                format!("bytecode refresh retries exhausted: {}", reason),
            ));
            return;
        }
        let Some(stream) = root_stream(&self.inflight, &tx.root) else {
            self.complete(tx.msg.tx_response(TxStatus::Transient, "chain stream closed"));
            return;
        };
        debug!("refreshing bytecode of {} for tx {}: {}", tx.artifact.key, key, reason);
        let observed = tx
            .msg
            .contract_index
            .max(tx.artifact.file_version.saturating_add(1));
        let contract = tx.artifact.key.clone();
        let origin = ByteCodeOrigin {
            tx_key: key,
            stream,
        };
        let cache = self.contract_cache.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match cache.invalidate_if_stale(contract.clone(), observed).await {
                Ok(_) => cache.get_contract(contract, observed, origin).await,
                Err(e) => Err(e),
            };
            let _ = internal_tx.send(InternalEvent::Requeue { tx, result }).await;
        });
    }

    fn on_requeue(&mut self, mut tx: QueuedTx, result: Result<ContractArtifact, ContractCacheError>) {
        if !self.inflight.contains_key(&tx.key()) {
            return;
        }
        let artifact = match result {
            Ok(artifact) => artifact,
            Err(e) => {
                self.complete(
                    tx.msg
                        .tx_response(fetch_status(&e), format!("bytecode unavailable: {}", e)),
                );
                return;
            }
        };
        let drain = self.cfg.stale_drain_timeout.to_duration();
        let queue_size = self.cfg.queue_size;
        let key = artifact.key.clone();
        let is_orig = tx.is_orig;
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| RequestGroup::new(key.clone(), queue_size));
        group.publish(artifact, drain);
        let Some(latest) = group.artifact() else {
            return;
        };
        tx.attempts += 1;
        tx.msg.file_version = latest.file_version;
        tx.artifact = latest;
        match group.enqueue(tx) {
            Ok(()) => self.signal_demand(&key, is_orig),
            Err(rejected) => self.reject_busy(&rejected.msg, "request queue full"),
        }
    }

    fn on_connection_stopped(&mut self, stream_id: ChainStreamId, chain_ids: Vec<String>) {
        let roots: HashSet<UniqueTxKey> = self
            .inflight
            .iter()
            .filter(|(_, tx)| tx.stream_id == Some(stream_id))
            .map(|(key, _)| key.clone())
            .collect();
        let children: Vec<UniqueTxKey> = self
            .inflight
            .iter()
            .filter(|(_, tx)| tx.stream_id.is_none() && roots.contains(&tx.root))
            .map(|(key, _)| key.clone())
            .collect();
        info!(
            "{} stopped with {} pending txs and {} pending calls",
            stream_id,
            roots.len(),
            children.len()
        );
        for key in children.iter().chain(roots.iter()) {
            self.fail_inflight(key, TxStatus::Transient, "chain stream closed");
        }
        // lets the forwarder drain and release the writer
        self.forwarders.remove(&stream_id);
        for group in self.groups.values_mut() {
            group.waiting.retain(|w| !roots.contains(&w.root));
        }
        if let Err(e) = self
            .process_manager
            .notify_event(EngineEvent::ConnectionStopped { chain_ids })
        {
            warn!("could not notify connection stop: {}", e);
        }
    }

    fn on_sweep(&mut self) {
        let now = Instant::now();
        let expired: Vec<UniqueTxKey> = self
            .inflight
            .iter()
            .filter(|(_, tx)| tx.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.fail_inflight(&key, TxStatus::Timeout, "tx deadline exceeded");
        }

        self.forwarders.retain(|_, forwarder| !forwarder.is_closed());

        let grace = self.cfg.group_idle_grace.to_duration();
        let census = self.census.snapshot();
        self.groups.retain(|key, group| {
            group.waiting.retain(|w| w.deadline > now);
            let destroy = group.idle(grace, now) && census.count_for_key(key) == 0;
            if destroy {
                debug!("destroying idle request group {}", key);
            }
            !destroy
        });

        // renew demand lost to a full process manager mailbox or a busy pool
        let keys: Vec<ContractKey> = self.groups.keys().cloned().collect();
        for key in keys {
            self.signal_demand(&key, true);
            self.signal_demand(&key, false);
        }

        let stats = self.stats();
        engine_metrics::set_scheduler_load(
            stats.request_groups,
            stats.queued_txs,
            stats.inflight_txs,
        );
    }

    fn fail_inflight(&mut self, key: &UniqueTxKey, status: TxStatus, reason: &str) {
        let header = match self.inflight.get(key) {
            Some(tx) => tx.header.clone(),
            None => return,
        };
        self.complete(header.tx_response(status, reason));
    }

    /// Delivers the outcome of a tx to its notifier, once.
    /// Returns false when the tx already completed.
    fn complete(&mut self, mut response: EngineMessage) -> bool {
        let key = response.unique_tx_key();
        let Some(inflight) = self.inflight.remove(&key) else {
            debug!("dropping late completion of tx {}", key);
            return false;
        };
        self.state_waiters.remove(&key);
        inflight.cancel.cancel();
        response.set_msg_type(MessageType::TxResponse);
        let status = response.status();
        engine_metrics::inc_tx_completions(status.as_str_name());
        engine_trace!("scheduler.complete", { "tx": key.to_string(), "status": status.as_str_name() });
        match inflight.notifier {
            TxNotifier::Chain(stream) => self.deliver(&stream, response),
            TxNotifier::Caller(reply_tx) => {
                let _ = reply_tx.send(response);
            }
        }
        true
    }

    /// Writes a message to a chain stream without blocking the loop.
    ///
    /// Once the writer queue of a stream is full, its messages go through a
    /// forwarding task that awaits room, keeping their order.
    fn deliver(&mut self, stream: &ChainStream, msg: EngineMessage) {
        let msg = match self.forwarders.get(&stream.id()) {
            Some(forwarder) => match forwarder.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => {
                    self.forwarders.remove(&stream.id());
                    msg
                }
            },
            None => msg,
        };
        match stream.try_queue(msg) {
            Ok(()) => {}
            Err(TrySendError::Closed(msg)) => debug!(
                "{} closed, dropping {} of tx {}",
                stream.id(),
                msg.msg_type().as_str_name(),
                msg.unique_tx_key()
            ),
            Err(TrySendError::Full(msg)) => {
                debug!("{} writer queue full, forwarding in order", stream.id());
                let (forward_tx, mut forward_rx) = mpsc::unbounded_channel();
                let _ = forward_tx.send(msg);
                let writer = stream.clone();
                tokio::spawn(async move {
                    while let Some(msg) = forward_rx.recv().await {
                        if writer.send(msg).await.is_err() {
                            break;
                        }
                    }
                });
                self.forwarders.insert(stream.id(), forward_tx);
            }
        }
    }
}
