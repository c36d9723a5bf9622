// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::launcher::{LaunchRequest, SandboxChild, SandboxLauncher};
use crate::user_pool::User;
use engine_logging::engine_trace;
use engine_models::{ContractArtifact, ContractKey, EngineMessage, MessageType, ProcessName, TxStatus};
use engine_process_exports::{ProcessConfig, ProcessState, SandboxExitMsg};
use engine_rpc_exports::{SandboxLink, SandboxRuntime};
use engine_scheduler_exports::{Lane, ParentTx, QueuedTx, SchedulerCommandSender};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Commands sent by the process manager to one process
#[derive(Debug)]
pub(crate) enum ProcessCommand {
    /// serve another lane, reloading the bytecode of its contract
    ChangeSandbox {
        lane: Lane,
        artifact: ContractArtifact,
    },
    /// drain and exit
    Close,
}

/// Reports of processes to their manager
#[derive(Debug)]
pub(crate) enum ProcessEvent {
    StateChanged {
        name: ProcessName,
        state: ProcessState,
        key: ContractKey,
    },
    Exited {
        exit: SandboxExitMsg,
        /// whether the sandbox ever loaded a bytecode
        reached_ready: bool,
    },
}

/// What every process shares with its manager.
#[derive(Clone)]
pub(crate) struct ProcessContext {
    pub cfg: ProcessConfig,
    pub launcher: Arc<dyn SandboxLauncher>,
    pub runtime: SandboxRuntime,
    pub scheduler: SchedulerCommandSender,
    pub event_tx: mpsc::Sender<ProcessEvent>,
}

enum Step {
    Continue,
    /// leave the loop, with the failure when there is one
    Close(Option<String>),
}

fn describe_exit(status: io::Result<Option<i32>>) -> String {
    match status {
        Ok(Some(code)) => format!("exit code {}", code),
        Ok(None) => "killed by a signal".to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

/// One sandbox child and the state machine driving it.
pub(crate) struct SandboxProcess {
    ctx: ProcessContext,
    name: ProcessName,
    user: User,
    lane: Lane,
    /// bytecode being loaded, or loaded once Ready
    target: ContractArtifact,
    loaded: Option<ContractArtifact>,
    state: ProcessState,
    tx_count: u64,
    reached_ready: bool,
    command_rx: mpsc::Receiver<ProcessCommand>,
    inbound_tx: mpsc::Sender<EngineMessage>,
    inbound_rx: mpsc::Receiver<EngineMessage>,
    /// tx running in the sandbox
    current: Option<QueuedTx>,
    /// tx popped while the matching bytecode is loaded
    pending_tx: Option<QueuedTx>,
    phase_deadline: Option<Instant>,
}

impl SandboxProcess {
    pub fn new(
        ctx: ProcessContext,
        name: ProcessName,
        user: User,
        lane: Lane,
        artifact: ContractArtifact,
        command_rx: mpsc::Receiver<ProcessCommand>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(ctx.cfg.channel_size);
        SandboxProcess {
            ctx,
            name,
            user,
            lane,
            target: artifact,
            loaded: None,
            state: ProcessState::Created,
            tx_count: 0,
            reached_ready: false,
            command_rx,
            inbound_tx,
            inbound_rx,
            current: None,
            pending_tx: None,
            phase_deadline: None,
        }
    }

    pub async fn run(mut self) {
        let link_rx = self
            .ctx
            .runtime
            .expect_bind(&self.name, self.inbound_tx.clone());
        let request = LaunchRequest {
            process_name: self.name.clone(),
            user: self.user.clone(),
            socket_path: self.ctx.cfg.sandbox_socket_path.clone(),
        };
        let mut child = match self.ctx.launcher.launch(request).await {
            Ok(child) => child,
            Err(e) => {
                warn!("could not launch sandbox {}: {}", self.name, e);
                self.ctx.runtime.cancel_bind(&self.name);
                self.exit(Some(e.to_string())).await;
                return;
            }
        };
        debug!(
            "sandbox {} started as {} (pid {:?})",
            self.name,
            self.user.name,
            child.id()
        );

        let err = match self.bind(link_rx, child.as_mut()).await {
            Ok(link) => self.serve(link, child.as_mut()).await,
            Err(err) => err,
        };
        self.shutdown(child, err).await;
    }

    async fn bind(
        &mut self,
        mut link_rx: oneshot::Receiver<SandboxLink>,
        child: &mut dyn SandboxChild,
    ) -> Result<SandboxLink, Option<String>> {
        let deadline = tokio::time::sleep(self.ctx.cfg.bind_timeout.to_duration());
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                link = &mut link_rx => {
                    return link.map_err(|_| Some("sandbox bind abandoned".to_string()));
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(ProcessCommand::ChangeSandbox { lane, artifact }) => {
                        self.lane = lane;
                        self.target = artifact;
                    }
                    Some(ProcessCommand::Close) | None => return Err(None),
                },
                status = child.wait() => {
                    return Err(Some(format!(
                        "sandbox exited before registering: {}",
                        describe_exit(status)
                    )));
                }
                _ = &mut deadline => {
                    return Err(Some("sandbox did not register in time".to_string()));
                }
            }
        }
    }

    async fn serve(&mut self, link: SandboxLink, child: &mut dyn SandboxChild) -> Option<String> {
        let SandboxLink { writer, mut closed } = link;
        if let Step::Close(err) = self.begin_change(self.target.clone(), &writer).await {
            return err;
        }
        loop {
            let can_pop = self.state == ProcessState::Ready
                && self.current.is_none()
                && self.pending_tx.is_none();
            let deadline = self
                .phase_deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(tokio::time::Instant::now);
            let step = tokio::select! {
                biased;
                cmd = self.command_rx.recv() => self.on_command(cmd, &writer).await,
                reason = &mut closed => Step::Close(Some(
                    reason.ok().flatten().unwrap_or_else(|| "sandbox stream closed".to_string()),
                )),
                status = child.wait() => Step::Close(Some(format!("sandbox exited: {}", describe_exit(status)))),
                Some(msg) = self.inbound_rx.recv() => self.on_inbound(msg, &writer).await,
                Some(tx) = self.lane.pop(), if can_pop => self.dispatch(tx, &writer).await,
                _ = tokio::time::sleep_until(deadline), if self.phase_deadline.is_some() => self.on_phase_timeout(),
            };
            if let Step::Close(err) = step {
                return err;
            }
        }
    }

    async fn on_command(
        &mut self,
        cmd: Option<ProcessCommand>,
        writer: &mpsc::Sender<EngineMessage>,
    ) -> Step {
        match cmd {
            Some(ProcessCommand::ChangeSandbox { lane, artifact }) => {
                if self.state != ProcessState::Ready || self.pending_tx.is_some() {
                    // no longer a valid victim, the manager learns it from the state report
                    debug!("{} ignores ChangeSandbox while {}", self.name, self.state);
                    self.report_state().await;
                    return Step::Continue;
                }
                info!(
                    "{} changes from {} to {}",
                    self.name,
                    self.lane.key(),
                    artifact.key
                );
                self.lane = lane;
                self.begin_change(artifact, writer).await
            }
            Some(ProcessCommand::Close) | None => Step::Close(None),
        }
    }

    /// Asks the sandbox to load `artifact`.
    async fn begin_change(
        &mut self,
        artifact: ContractArtifact,
        writer: &mpsc::Sender<EngineMessage>,
    ) -> Step {
        let mut req = EngineMessage::new(MessageType::ChangeSandboxReq, &artifact.key.chain_id, "")
            .with_contract(&artifact.key)
            .with_payload(artifact.path.to_string_lossy().into_owned().into_bytes());
        req.file_version = artifact.file_version;
        req.contract_index = artifact.file_version;
        req.process_name = self.name.to_string();
        self.target = artifact;
        if writer.send(req).await.is_err() {
            return Step::Close(Some("sandbox stream closed".to_string()));
        }
        self.phase_deadline = Some(
            self.ctx
                .cfg
                .change_sandbox_timeout
                .deadline_from(Instant::now()),
        );
        self.set_state(ProcessState::Changing).await;
        Step::Continue
    }

    async fn on_inbound(&mut self, msg: EngineMessage, writer: &mpsc::Sender<EngineMessage>) -> Step {
        match msg.msg_type() {
            MessageType::ChangeSandboxResp => self.on_change_sandbox_resp(msg, writer).await,
            MessageType::TxResponse | MessageType::Completion | MessageType::Error => {
                self.on_tx_done(msg).await
            }
            MessageType::CallContractReq => {
                self.on_call_contract(msg, writer).await;
                Step::Continue
            }
            MessageType::GetStateReq
            | MessageType::CreateKvIteratorReq
            | MessageType::GetByteCodeReq => {
                self.on_callback(msg, writer).await;
                Step::Continue
            }
            other => {
                debug!("{} ignores {}", self.name, other.as_str_name());
                Step::Continue
            }
        }
    }

    /// The running tx, if `msg` belongs to it.
    fn current_for(&self, msg: &EngineMessage) -> Option<&QueuedTx> {
        self.current
            .as_ref()
            .filter(|tx| tx.key() == msg.unique_tx_key())
    }

    async fn on_change_sandbox_resp(
        &mut self,
        msg: EngineMessage,
        writer: &mpsc::Sender<EngineMessage>,
    ) -> Step {
        if self.state != ProcessState::Changing {
            debug!("{} got an unexpected ChangeSandboxResp", self.name);
            return Step::Continue;
        }
        self.phase_deadline = None;
        if !msg.is_ok() {
            let reason = format!(
                "bytecode load of {} failed: {} {}",
                self.target.key,
                msg.status().as_str_name(),
                msg.message
            );
            if msg.status() == TxStatus::BadContract {
                if let Some(tx) = self.pending_tx.take() {
                    if let Err(e) = self.ctx.scheduler.bad_contract(tx, reason.clone()).await {
                        warn!("could not hand back tx: {}", e);
                    }
                }
            }
            return Step::Close(Some(reason));
        }

        self.loaded = Some(self.target.clone());
        self.reached_ready = true;
        self.set_state(ProcessState::Ready).await;
        match self.pending_tx.take() {
            Some(tx) => self.start_tx(tx, writer).await,
            None => Step::Continue,
        }
    }

    async fn on_tx_done(&mut self, msg: EngineMessage) -> Step {
        if self.current_for(&msg).is_none() {
            debug!(
                "{} drops {} of tx {} not running here",
                self.name,
                msg.msg_type().as_str_name(),
                msg.unique_tx_key()
            );
            return Step::Continue;
        }
        let Some(tx) = self.current.take() else {
            return Step::Continue;
        };
        self.ctx.runtime.deregister_sandbox_msg_notify(&tx.key());
        self.phase_deadline = None;
        self.tx_count += 1;
        engine_trace!("process.tx_done", { "process": self.name.to_string(), "tx": tx.key().to_string(), "status": msg.status().as_str_name() });

        if msg.status() == TxStatus::BadContract {
            debug!("{} refused the bytecode of tx {}", self.name, tx.key());
            if let Err(e) = self.ctx.scheduler.bad_contract(tx, msg.message).await {
                warn!("could not hand back tx: {}", e);
            }
        } else {
            let mut response = msg;
            response.set_msg_type(MessageType::TxResponse);
            if let Err(e) = self.ctx.scheduler.tx_completed(response).await {
                warn!("could not report tx completion: {}", e);
            }
        }

        if self.ctx.cfg.max_tx_per_process > 0 && self.tx_count >= self.ctx.cfg.max_tx_per_process {
            info!("{} spent its budget of {} txs", self.name, self.tx_count);
            return Step::Close(None);
        }
        self.set_state(ProcessState::Ready).await;
        Step::Continue
    }

    async fn on_call_contract(&mut self, msg: EngineMessage, writer: &mpsc::Sender<EngineMessage>) {
        let Some(current) = self.current_for(&msg) else {
            debug!("{} drops a call of tx {} not running here", self.name, msg.unique_tx_key());
            return;
        };
        let parent = ParentTx {
            key: current.key(),
            root: current.root.clone(),
            call_depth: current.msg.call_depth,
            deadline: current.deadline,
        };
        let header = msg.header();
        let writer = writer.clone();
        match self.ctx.scheduler.cross_call(msg, parent).await {
            Ok(reply_rx) => {
                tokio::spawn(async move {
                    let mut resp = match reply_rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => header.tx_response(TxStatus::Transient, "call abandoned"),
                    };
                    resp.set_msg_type(MessageType::CallContractResp);
                    resp.tx_id = header.tx_id;
                    resp.chain_id = header.chain_id;
                    let _ = writer.send(resp).await;
                });
            }
            Err(e) => {
                let _ = writer
                    .send(header.response(MessageType::CallContractResp, TxStatus::Transient, e.to_string()))
                    .await;
            }
        }
    }

    /// Hands state and bytecode requests to the scheduler; answers go straight to the sandbox.
    async fn on_callback(&mut self, msg: EngineMessage, writer: &mpsc::Sender<EngineMessage>) {
        let Some(root) = self.current_for(&msg).map(|tx| tx.root.clone()) else {
            debug!(
                "{} drops {} of tx {} not running here",
                self.name,
                msg.msg_type().as_str_name(),
                msg.unique_tx_key()
            );
            return;
        };
        let resp_type = match msg.msg_type() {
            MessageType::GetByteCodeReq => MessageType::GetByteCodeResp,
            MessageType::CreateKvIteratorReq => MessageType::CreateKvIteratorResp,
            _ => MessageType::GetStateResp,
        };
        let header = msg.header();
        let res = if resp_type == MessageType::GetByteCodeResp {
            self.ctx
                .scheduler
                .bytecode_request(msg, root, writer.clone())
                .await
        } else {
            self.ctx
                .scheduler
                .state_request(msg, root, writer.clone())
                .await
        };
        if let Err(e) = res {
            let _ = writer
                .send(header.response(resp_type, TxStatus::Transient, e.to_string()))
                .await;
        }
    }

    async fn dispatch(&mut self, tx: QueuedTx, writer: &mpsc::Sender<EngineMessage>) -> Step {
        let now = Instant::now();
        if tx.is_expired(now) {
            // already answered by the scheduler
            debug!("{} skips expired tx {}", self.name, tx.key());
            return Step::Continue;
        }
        if tx.is_cancelled() {
            debug!("{} skips answered tx {}", self.name, tx.key());
            return Step::Continue;
        }
        let latest = self.lane.latest_artifact();
        if let Some(latest) = &latest {
            let outdated = tx.artifact.file_version < latest.artifact.file_version;
            let drained = latest.stale_deadline.map_or(false, |d| now >= d);
            if outdated && drained {
                if let Err(e) = self
                    .ctx
                    .scheduler
                    .bad_contract(tx, "bytecode outdated past the drain deadline".to_string())
                    .await
                {
                    warn!("could not hand back tx: {}", e);
                }
                return Step::Continue;
            }
        }

        let needs_reload = match &self.loaded {
            Some(loaded) => {
                loaded.key != tx.artifact.key || loaded.file_version < tx.artifact.file_version
            }
            None => true,
        };
        if !needs_reload {
            return self.start_tx(tx, writer).await;
        }
        let target = match latest {
            Some(latest)
                if latest.artifact.key == tx.artifact.key
                    && latest.artifact.file_version > tx.artifact.file_version =>
            {
                latest.artifact
            }
            _ => tx.artifact.clone(),
        };
        self.pending_tx = Some(tx);
        self.begin_change(target, writer).await
    }

    async fn start_tx(&mut self, tx: QueuedTx, writer: &mpsc::Sender<EngineMessage>) -> Step {
        let key = tx.key();
        self.ctx
            .runtime
            .register_sandbox_msg_notify(key.clone(), self.inbound_tx.clone());
        let sent = writer.send(tx.msg.clone()).await;
        self.phase_deadline = Some(
            tx.deadline
                .checked_add(self.ctx.cfg.close_timeout.to_duration())
                .unwrap_or(tx.deadline),
        );
        self.current = Some(tx);
        if sent.is_err() {
            return Step::Close(Some("sandbox stream closed".to_string()));
        }
        debug!("{} runs tx {}", self.name, key);
        self.set_state(ProcessState::Busy).await;
        Step::Continue
    }

    fn on_phase_timeout(&mut self) -> Step {
        self.phase_deadline = None;
        match self.state {
            ProcessState::Changing => Step::Close(Some(format!(
                "sandbox did not load {} in time",
                self.target.key
            ))),
            ProcessState::Busy => Step::Close(Some("tx overran its deadline".to_string())),
            _ => Step::Continue,
        }
    }

    async fn shutdown(&mut self, mut child: Box<dyn SandboxChild>, err: Option<String>) {
        self.set_state(ProcessState::Closing).await;
        let (status, reason) = match &err {
            Some(reason) => (TxStatus::SandboxExited, reason.clone()),
            None => (TxStatus::Transient, "sandbox process closing".to_string()),
        };
        if let Some(tx) = self.current.take() {
            self.ctx.runtime.deregister_sandbox_msg_notify(&tx.key());
            if let Err(e) = self
                .ctx
                .scheduler
                .tx_completed(tx.msg.tx_response(status, reason))
                .await
            {
                debug!("could not cancel tx {}: {}", tx.key(), e);
            }
        }
        if let Some(tx) = self.pending_tx.take() {
            if let Err(e) = self
                .ctx
                .scheduler
                .tx_completed(tx.msg.tx_response(TxStatus::Transient, "sandbox process closing"))
                .await
            {
                debug!("could not cancel tx {}: {}", tx.key(), e);
            }
        }

        let close_timeout = self.ctx.cfg.close_timeout.to_duration();
        match tokio::time::timeout(close_timeout, child.kill()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("could not kill sandbox {}: {}", self.name, e),
            Err(_) => warn!("sandbox {} did not exit in time", self.name),
        }
        self.ctx.runtime.cancel_bind(&self.name);
        self.exit(err).await;
    }

    async fn exit(&mut self, err: Option<String>) {
        self.state = ProcessState::Exited;
        let artifact = self.loaded.as_ref().unwrap_or(&self.target);
        let exit = SandboxExitMsg {
            chain_id: artifact.key.chain_id.clone(),
            contract_name: artifact.key.contract_name.clone(),
            contract_version: artifact.key.contract_version.clone(),
            contract_index: artifact.file_version,
            process_name: self.name.clone(),
            err,
        };
        let _ = self
            .ctx
            .event_tx
            .send(ProcessEvent::Exited {
                exit,
                reached_ready: self.reached_ready,
            })
            .await;
    }

    async fn set_state(&mut self, state: ProcessState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.report_state().await;
    }

    async fn report_state(&self) {
        let _ = self
            .ctx
            .event_tx
            .send(ProcessEvent::StateChanged {
                name: self.name.clone(),
                state: self.state,
                key: self.lane.key().clone(),
            })
            .await;
    }
}
