// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::engine::Engine;
use crate::settings::{
    ContractSettings, EngineSettings, ProcessSettings, RpcSettings, SchedulerSettings,
};
use engine_models::{ContractKey, EngineMessage, TxStatus};
use engine_process_exports::CensusSnapshot;
use engine_process_worker::test_exports::{FakeSandboxLauncher, SandboxConnector, SandboxScript, ScriptStep};
use engine_rpc_worker::test_exports::ChainClient;
use engine_time::EngineTime;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const UID_BASE: u32 = 30_000;
pub const WAIT: Duration = Duration::from_secs(5);

/// Small pools and short timers, everything under `dir`.
pub fn engine_settings(dir: &Path) -> EngineSettings {
    EngineSettings {
        process: ProcessSettings {
            max_original_process_num: 1,
            call_contract_depth: 3,
            release_rate: 1.0,
            idle_release_timeout: EngineTime::from_secs(60),
            release_interval: EngineTime::from_millis(20),
            bind_timeout: EngineTime::from_millis(1000),
            change_sandbox_timeout: EngineTime::from_millis(1000),
            close_timeout: EngineTime::from_millis(200),
            switch_user: false,
            user_uid_base: UID_BASE,
            ..Default::default()
        },
        scheduler: SchedulerSettings {
            default_tx_timeout: EngineTime::from_millis(4000),
            group_idle_grace: EngineTime::from_secs(60),
            sweep_interval: EngineTime::from_millis(20),
            stale_drain_timeout: EngineTime::from_millis(500),
            ..Default::default()
        },
        contract: ContractSettings {
            cache_dir: dir.join("contracts"),
            fetch_timeout: EngineTime::from_millis(2000),
        },
        rpc: RpcSettings {
            chain_rpc_bind: "127.0.0.1:0".parse().unwrap(),
            register_timeout: EngineTime::from_millis(1000),
            flush_timeout: EngineTime::from_millis(100),
            ..Default::default()
        },
        sandbox_rpc_dir: dir.join("rpc"),
        channel_size: 64,
        ..Default::default()
    }
}

pub fn contract(name: &str) -> ContractKey {
    ContractKey::new("chain1", name, "v1").unwrap()
}

/// Answers every tx `Ok` with `done`.
pub fn answering() -> SandboxScript {
    Arc::new(|_| ScriptStep::Respond {
        status: TxStatus::Ok,
        payload: b"done".to_vec(),
    })
}

/// A full engine whose sandboxes are in-process fakes, with one chain connected.
pub struct EngineHarness {
    pub engine: Engine,
    pub fake: FakeSandboxLauncher,
    pub chain: ChainClient,
    _dir: TempDir,
}

impl EngineHarness {
    pub async fn start(
        tune: impl FnOnce(EngineSettings) -> EngineSettings,
        script: SandboxScript,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = tune(engine_settings(dir.path()));
        let mut fake = None;
        let engine = Engine::start(&settings, |stream_connector| {
            let connector: SandboxConnector =
                Arc::new(move |stream| stream_connector.attach(stream));
            let launcher = FakeSandboxLauncher::new(connector, script);
            fake = Some(launcher.clone());
            Arc::new(launcher)
        })
        .await
        .unwrap();
        let chain = ChainClient::connect(&engine.chain_connector()).unwrap();
        EngineHarness {
            engine,
            fake: fake.unwrap(),
            chain,
            _dir: dir,
        }
    }

    /// Serves `code` for `key` at `contract_index`.
    pub fn serve(&mut self, key: &ContractKey, contract_index: i64, code: &[u8]) {
        self.chain
            .contracts
            .insert(key.clone(), (contract_index, code.to_vec()));
    }

    pub async fn response(&mut self) -> EngineMessage {
        self.chain
            .next_response(WAIT)
            .await
            .expect("no response in time")
    }

    /// Waits until the census satisfies `cond`.
    pub async fn census_until(&self, cond: impl Fn(&CensusSnapshot) -> bool) -> CensusSnapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = self.engine.census().snapshot();
            if cond(&snapshot) {
                return snapshot;
            }
            assert!(Instant::now() < deadline, "census never matched: {:?}", snapshot);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn launched_uids(&self) -> Vec<u32> {
        self.fake.launched().iter().map(|req| req.user.uid).collect()
    }

    pub async fn stop(self) {
        self.engine.stop().await;
    }
}
