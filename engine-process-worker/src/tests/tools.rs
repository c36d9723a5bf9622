// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::start_process_manager;
use crate::test_exports::{FakeSandboxLauncher, SandboxConnector, SandboxScript, ScriptStep};
use crate::SandboxLauncher;
use engine_models::{ContractArtifact, ContractKey, EngineMessage, MessageType, TxStatus};
use engine_process_exports::{
    process_manager_channel, CensusSnapshot, PoolCensus, ProcessConfig,
    ProcessManagerCommandSender, ProcessPoolManager,
};
use engine_rpc_exports::{RpcConfig, SandboxRuntime};
use engine_rpc_worker::{start_sandbox_rpc, SandboxRpcManager};
use engine_scheduler_exports::{scheduler_channel, ArtifactCell, Lane, QueuedTx, SchedulerCommand};
use engine_time::EngineTime;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const UID_BASE: u32 = 20_000;

pub fn process_config(dir: &Path) -> ProcessConfig {
    ProcessConfig {
        max_original_process_num: 1,
        call_contract_depth: 2,
        release_rate: 1.0,
        idle_release_timeout: EngineTime::from_millis(60_000),
        release_interval: EngineTime::from_millis(20),
        max_tx_per_process: 0,
        bind_timeout: EngineTime::from_millis(1000),
        change_sandbox_timeout: EngineTime::from_millis(1000),
        close_timeout: EngineTime::from_millis(200),
        sandbox_bin: "/usr/bin/false".into(),
        sandbox_socket_path: dir.join("rpc").join("sandbox.sock"),
        user_uid_base: UID_BASE,
        user_count: 0,
        channel_size: 64,
    }
}

fn rpc_config(dir: &Path) -> RpcConfig {
    RpcConfig {
        chain_rpc_bind: "127.0.0.1:0".parse().unwrap(),
        sandbox_rpc_dir: dir.join("rpc"),
        sandbox_socket_name: "sandbox.sock".to_string(),
        max_send_msg_size: 1,
        max_recv_msg_size: 1,
        write_timeout: EngineTime::from_millis(1000),
        register_timeout: EngineTime::from_millis(1000),
        flush_timeout: EngineTime::from_millis(100),
        stream_channel_size: 16,
        max_protocol_violations: 3,
    }
}

pub fn counter_key() -> ContractKey {
    ContractKey::new("chain1", "counter", "v1").unwrap()
}

pub fn ledger_key() -> ContractKey {
    ContractKey::new("chain1", "ledger", "v1").unwrap()
}

/// Answers every tx `Ok` with `done`.
pub fn answering() -> SandboxScript {
    Arc::new(|_| ScriptStep::Respond {
        status: TxStatus::Ok,
        payload: b"done".to_vec(),
    })
}

pub fn artifact(key: &ContractKey, file_version: i64, dir: &Path) -> ContractArtifact {
    ContractArtifact {
        key: key.clone(),
        path: dir.join(format!("{}#{}", key.contract_name, file_version)),
        file_version,
    }
}

/// A lane whose group published `artifact`.
pub fn lane(artifact: &ContractArtifact, is_orig: bool) -> Lane {
    let cell = ArtifactCell::default();
    cell.publish(artifact.clone(), Duration::from_secs(1));
    Lane::new(artifact.key.clone(), is_orig, 8, cell)
}

pub fn queued(tx_id: &str, artifact: &ContractArtifact, is_orig: bool) -> QueuedTx {
    let key = &artifact.key;
    let mut msg = EngineMessage::new(MessageType::TxRequest, &key.chain_id, tx_id)
        .with_contract(key)
        .with_payload(b"args".to_vec());
    msg.contract_index = artifact.file_version;
    msg.call_depth = 1;
    let now = Instant::now();
    QueuedTx {
        root: msg.unique_tx_key(),
        msg,
        is_orig,
        artifact: artifact.clone(),
        enqueued_at: now,
        deadline: now + Duration::from_secs(5),
        attempts: 0,
        cancel: Default::default(),
    }
}

/// A running process manager behind a real sandbox service, with the
/// scheduler mailbox its processes write to.
pub struct PoolHarness {
    pub pm: ProcessManagerCommandSender,
    pub census: PoolCensus,
    pub scheduler_rx: mpsc::Receiver<SchedulerCommand>,
    pub runtime: SandboxRuntime,
    pub fake: Option<FakeSandboxLauncher>,
    pub dir: TempDir,
    manager: ProcessPoolManager,
    sandbox_rpc: SandboxRpcManager,
}

impl PoolHarness {
    pub async fn start(cfg: impl FnOnce(&Path) -> ProcessConfig, script: SandboxScript) -> Self {
        let mut fake = None;
        let harness = Self::start_with(cfg, |connector| {
            let launcher = FakeSandboxLauncher::new(connector, script);
            fake = Some(launcher.clone());
            Arc::new(launcher)
        })
        .await;
        PoolHarness { fake, ..harness }
    }

    pub async fn start_with(
        cfg: impl FnOnce(&Path) -> ProcessConfig,
        launcher: impl FnOnce(SandboxConnector) -> Arc<dyn SandboxLauncher>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runtime = SandboxRuntime::new();
        let sandbox_rpc = start_sandbox_rpc(rpc_config(dir.path()), runtime.clone())
            .await
            .unwrap();
        let stream_connector = sandbox_rpc.connector();
        let connector: SandboxConnector = Arc::new(move |stream| stream_connector.attach(stream));

        let (scheduler, scheduler_rx) = scheduler_channel(64);
        let (pm, pm_rx) = process_manager_channel(64);
        let (manager, census) = start_process_manager(
            cfg(dir.path()),
            pm_rx,
            launcher(connector),
            runtime.clone(),
            scheduler,
        )
        .unwrap();
        PoolHarness {
            pm,
            census,
            scheduler_rx,
            runtime,
            fake: None,
            dir,
            manager,
            sandbox_rpc,
        }
    }

    /// Queues `txs` on `lane` and signals the demand.
    pub fn demand(&self, lane: &Lane, artifact: &ContractArtifact, txs: Vec<QueuedTx>) {
        for tx in txs {
            lane.try_push(tx).unwrap();
        }
        self.pm
            .request_processes(
                lane.key().clone(),
                lane.is_orig(),
                lane.depth(),
                lane.clone(),
                artifact.clone(),
            )
            .unwrap();
    }

    pub async fn scheduler_cmd(&mut self) -> SchedulerCommand {
        tokio::time::timeout(Duration::from_secs(3), self.scheduler_rx.recv())
            .await
            .expect("no scheduler command in time")
            .expect("scheduler mailbox closed")
    }

    /// Next tx outcome reported by a process.
    pub async fn completed(&mut self) -> EngineMessage {
        loop {
            if let SchedulerCommand::TxCompleted(resp) = self.scheduler_cmd().await {
                return resp;
            }
        }
    }

    /// Waits until the census satisfies `cond`.
    pub async fn census_until(&self, cond: impl Fn(&CensusSnapshot) -> bool) -> CensusSnapshot {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let snapshot = self.census.snapshot();
            if cond(&snapshot) {
                return snapshot;
            }
            assert!(Instant::now() < deadline, "census never matched: {:?}", snapshot);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn launched_uids(&self) -> Vec<u32> {
        self.fake
            .as_ref()
            .map(|fake| fake.launched().iter().map(|req| req.user.uid).collect())
            .unwrap_or_default()
    }

    pub async fn stop(self) {
        self.manager.stop().await.unwrap();
        self.sandbox_rpc.stop().await.unwrap();
    }
}
