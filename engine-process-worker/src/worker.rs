// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::process::{ProcessCommand, ProcessContext, ProcessEvent, SandboxProcess};
use crate::user_pool::{User, UserPool};
use engine_logging::engine_trace;
use engine_models::{ContractArtifact, ContractKey, ProcessName};
use engine_process_exports::{
    CensusSnapshot, CensusWriter, EngineEvent, ProcessError, ProcessManagerCommand, ProcessState,
    SandboxExitMsg,
};
use engine_scheduler_exports::Lane;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What the manager knows of one of its processes.
struct ProcessHandle {
    is_orig: bool,
    /// contract assigned by the last spawn or ChangeSandbox
    key: ContractKey,
    lane: Lane,
    state: ProcessState,
    ready_since: Option<Instant>,
    user: User,
    command_tx: mpsc::Sender<ProcessCommand>,
    join_handle: JoinHandle<()>,
}

/// Latest demand of a lane, kept to replace processes that exit.
struct LaneDemand {
    lane: Lane,
    artifact: ContractArtifact,
}

/// Drops the demands with nothing queued and no process left to replace.
fn forget_unused_lanes(
    lanes: &mut HashMap<(ContractKey, bool), LaneDemand>,
    assigned: &HashSet<(ContractKey, bool)>,
) {
    lanes.retain(|lane_key, demand| demand.lane.depth() > 0 || assigned.contains(lane_key));
}

pub(crate) struct ProcessManagerWorker {
    ctx: ProcessContext,
    command_rx: mpsc::Receiver<ProcessManagerCommand>,
    manager_rx: mpsc::Receiver<()>,
    event_rx: mpsc::Receiver<ProcessEvent>,
    processes: HashMap<ProcessName, ProcessHandle>,
    lanes: HashMap<(ContractKey, bool), LaneDemand>,
    users: UserPool,
    census: CensusWriter,
    next_index: u64,
}

impl ProcessManagerWorker {
    pub fn new(
        ctx: ProcessContext,
        command_rx: mpsc::Receiver<ProcessManagerCommand>,
        manager_rx: mpsc::Receiver<()>,
        event_rx: mpsc::Receiver<ProcessEvent>,
        users: UserPool,
        census: CensusWriter,
    ) -> Self {
        ProcessManagerWorker {
            ctx,
            command_rx,
            manager_rx,
            event_rx,
            processes: HashMap::new(),
            lanes: HashMap::new(),
            users,
            census,
            next_index: 0,
        }
    }

    pub async fn run_loop(mut self) -> Result<(), ProcessError> {
        let mut release = tokio::time::interval(
            self.ctx
                .cfg
                .release_interval
                .to_duration()
                .max(Duration::from_millis(1)),
        );
        release.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.manager_rx.recv() => break,
                Some(event) = self.event_rx.recv() => self.on_process_event(event),
                _ = release.tick() => self.release_idle(),
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
            self.publish_census();
        }
        self.close_all().await;
        Ok(())
    }

    fn on_command(&mut self, cmd: ProcessManagerCommand) {
        match cmd {
            ProcessManagerCommand::RequestProcesses {
                key,
                is_orig,
                want_n,
                lane,
                artifact,
            } => self.on_request_processes(key, is_orig, want_n, lane, artifact),
            ProcessManagerCommand::Event(EngineEvent::ConnectionStopped { chain_ids }) => {
                self.on_connection_stopped(&chain_ids)
            }
        }
    }

    fn live(&self, is_orig: bool) -> usize {
        self.processes
            .values()
            .filter(|p| p.is_orig == is_orig)
            .count()
    }

    /// Brings the processes able to take work from the lane of `key` up to `want_n`.
    fn on_request_processes(
        &mut self,
        key: ContractKey,
        is_orig: bool,
        want_n: usize,
        lane: Lane,
        artifact: ContractArtifact,
    ) {
        self.lanes.insert(
            (key.clone(), is_orig),
            LaneDemand {
                lane: lane.clone(),
                artifact: artifact.clone(),
            },
        );
        let existing = self
            .processes
            .values()
            .filter(|p| p.is_orig == is_orig && p.key == key && p.state.accepts_work())
            .count();
        if existing >= want_n {
            return;
        }
        let mut shortfall = want_n - existing;

        let free = self
            .ctx
            .cfg
            .max_process_num(is_orig)
            .saturating_sub(self.live(is_orig))
            .min(self.users.available());
        for _ in 0..shortfall.min(free) {
            match self.spawn_process(&key, is_orig, &lane, &artifact) {
                Ok(()) => shortfall -= 1,
                Err(e) => {
                    warn!("could not spawn a process for {}: {}", key, e);
                    break;
                }
            }
        }
        if shortfall > 0 {
            self.change_victims(&key, is_orig, want_n, shortfall, &lane, &artifact);
        }
    }

    fn spawn_process(
        &mut self,
        key: &ContractKey,
        is_orig: bool,
        lane: &Lane,
        artifact: &ContractArtifact,
    ) -> Result<(), ProcessError> {
        let user = self.users.acquire()?;
        self.next_index += 1;
        let name = ProcessName::new(is_orig, self.next_index);
        let (command_tx, command_rx) = mpsc::channel(self.ctx.cfg.channel_size);
        let process = SandboxProcess::new(
            self.ctx.clone(),
            name.clone(),
            user.clone(),
            lane.clone(),
            artifact.clone(),
            command_rx,
        );
        info!("spawning {} for {} as {}", name, key, user.name);
        engine_trace!("process_manager.spawn", { "process": name.to_string(), "contract": key.to_string(), "uid": user.uid });
        let join_handle = tokio::spawn(process.run());
        self.processes.insert(
            name,
            ProcessHandle {
                is_orig,
                key: key.clone(),
                lane: lane.clone(),
                state: ProcessState::Created,
                ready_since: None,
                user,
                command_tx,
                join_handle,
            },
        );
        Ok(())
    }

    /// Retargets Ready processes of less demanded contracts to `key`.
    ///
    /// Victims come from the keys with the lowest queue depth, the longest
    /// Ready first; a key is only robbed when its depth is below `want_n`.
    fn change_victims(
        &mut self,
        key: &ContractKey,
        is_orig: bool,
        want_n: usize,
        shortfall: usize,
        lane: &Lane,
        artifact: &ContractArtifact,
    ) {
        let mut candidates: Vec<(usize, Instant, ProcessName)> = self
            .processes
            .iter()
            .filter(|(_, p)| p.is_orig == is_orig && p.state == ProcessState::Ready && &p.key != key)
            .filter_map(|(name, p)| {
                let demand = p.lane.depth();
                let since = p.ready_since?;
                (demand < want_n).then(|| (demand, since, name.clone()))
            })
            .collect();
        if candidates.is_empty() {
            debug!("{} pool saturated, {} waits for a process", if is_orig { "origin" } else { "cross" }, key);
            return;
        }
        candidates.sort();

        for (_, _, name) in candidates.into_iter().take(shortfall) {
            let Some(handle) = self.processes.get_mut(&name) else {
                continue;
            };
            let cmd = ProcessCommand::ChangeSandbox {
                lane: lane.clone(),
                artifact: artifact.clone(),
            };
            if handle.command_tx.try_send(cmd).is_err() {
                debug!("could not send ChangeSandbox to {}", name);
                continue;
            }
            info!("retargeting {} from {} to {}", name, handle.key, key);
            handle.key = key.clone();
            handle.lane = lane.clone();
            handle.state = ProcessState::Changing;
            handle.ready_since = None;
        }
    }

    fn on_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::StateChanged { name, state, key } => {
                let Some(handle) = self.processes.get_mut(&name) else {
                    return;
                };
                if state == ProcessState::Ready {
                    if handle.state != ProcessState::Ready {
                        handle.ready_since = Some(Instant::now());
                    }
                } else {
                    handle.ready_since = None;
                }
                handle.state = state;
                if handle.key != key {
                    // a ChangeSandbox the process refused
                    if let Some(demand) = self.lanes.get(&(key.clone(), handle.is_orig)) {
                        handle.lane = demand.lane.clone();
                    }
                    handle.key = key;
                }
            }
            ProcessEvent::Exited {
                exit,
                reached_ready,
            } => self.on_exited(exit, reached_ready),
        }
    }

    fn on_exited(&mut self, exit: SandboxExitMsg, reached_ready: bool) {
        let Some(handle) = self.processes.remove(&exit.process_name) else {
            return;
        };
        self.users.release(handle.user);
        match &exit.err {
            Some(err) => warn!("{} exited: {}", exit.process_name, err),
            None => debug!("{} exited", exit.process_name),
        }
        if !reached_ready {
            // no replacement for sandboxes that never started, the next demand signal retries
            return;
        }
        let key = handle.key;
        let replacement = self
            .lanes
            .get(&(key.clone(), handle.is_orig))
            .filter(|demand| demand.lane.depth() > 0)
            .map(|demand| {
                let artifact = demand
                    .lane
                    .latest_artifact()
                    .map(|latest| latest.artifact)
                    .unwrap_or_else(|| demand.artifact.clone());
                (demand.lane.clone(), demand.lane.depth(), artifact)
            });
        if let Some((lane, depth, artifact)) = replacement {
            debug!("replacing {} for {} queued txs of {}", exit.process_name, depth, key);
            self.on_request_processes(key, handle.is_orig, depth, lane, artifact);
        }
    }

    /// Closes a share of the processes idle for longer than `idle_release_timeout`.
    fn release_idle(&mut self) {
        let assigned: HashSet<(ContractKey, bool)> = self
            .processes
            .values()
            .map(|p| (p.key.clone(), p.is_orig))
            .collect();
        forget_unused_lanes(&mut self.lanes, &assigned);

        let idle_timeout = self.ctx.cfg.idle_release_timeout.to_duration();
        let now = Instant::now();
        let mut idle: Vec<(Instant, ProcessName)> = self
            .processes
            .iter()
            .filter(|(_, p)| p.state == ProcessState::Ready && p.lane.depth() == 0)
            .filter_map(|(name, p)| {
                let since = p.ready_since?;
                (now.saturating_duration_since(since) >= idle_timeout).then(|| (since, name.clone()))
            })
            .collect();
        if idle.is_empty() {
            return;
        }
        idle.sort();
        let rate = self.ctx.cfg.release_rate.clamp(0.0, 1.0);
        let n = (idle.len() as f64 * rate).ceil() as usize;
        for (_, name) in idle.into_iter().take(n) {
            self.close_process(&name);
        }
    }

    fn on_connection_stopped(&mut self, chain_ids: &[String]) {
        let names: Vec<ProcessName> = self
            .processes
            .iter()
            .filter(|(_, p)| p.state == ProcessState::Ready && chain_ids.contains(&p.key.chain_id))
            .map(|(name, _)| name.clone())
            .collect();
        if !names.is_empty() {
            info!("closing {} processes of stopped chains {:?}", names.len(), chain_ids);
        }
        for name in names {
            self.close_process(&name);
        }
    }

    fn close_process(&mut self, name: &ProcessName) {
        let Some(handle) = self.processes.get_mut(name) else {
            return;
        };
        if handle.command_tx.try_send(ProcessCommand::Close).is_err() {
            debug!("could not send Close to {}", name);
            return;
        }
        debug!("closing {}", name);
        handle.state = ProcessState::Closing;
        handle.ready_since = None;
    }

    fn publish_census(&self) {
        let mut snapshot = CensusSnapshot::default();
        for handle in self.processes.values() {
            if handle.is_orig {
                snapshot.live_orig += 1;
            } else {
                snapshot.live_cross += 1;
            }
            *snapshot.by_key.entry(handle.key.clone()).or_insert(0) += 1;
            *snapshot.by_state.entry(handle.state).or_insert(0) += 1;
        }
        engine_metrics::set_pool_census(
            snapshot.live_orig,
            snapshot.live_cross,
            snapshot.count_in_state(ProcessState::Busy),
        );
        self.census.publish(snapshot);
    }

    /// Closes every process and waits for their exit reports.
    async fn close_all(&mut self) {
        let names: Vec<ProcessName> = self.processes.keys().cloned().collect();
        for name in &names {
            if let Some(handle) = self.processes.get(name) {
                // a full mailbox means the process is busy closing already
                let _ = handle.command_tx.try_send(ProcessCommand::Close);
            }
        }
        let cfg = &self.ctx.cfg;
        let grace = cfg
            .close_timeout
            .saturating_mul(2)
            .saturating_add(cfg.change_sandbox_timeout)
            .to_duration();
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        while !self.processes.is_empty() {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    if let ProcessEvent::Exited { exit, .. } = event {
                        if let Some(handle) = self.processes.remove(&exit.process_name) {
                            self.users.release(handle.user);
                        }
                    }
                }
                _ = &mut deadline => {
                    warn!("{} processes did not exit in time", self.processes.len());
                    break;
                }
            }
        }
        for (_, handle) in self.processes.drain() {
            handle.join_handle.abort();
        }
        self.publish_census();
    }
}
