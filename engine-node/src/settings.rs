// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Build the engine settings.
//!
//! The configuration file lives at `<docker_mount_dir>/<config_file_name>`.
//! Both parts default to `/mount` and `engine.toml` and are overridden by the
//! `ENGINE_MOUNT_DIR` and `ENGINE_CONFIG_FILE_NAME` environment variables,
//! then by the command line. A missing file is not an error: every key has a
//! default. Variables prefixed with `ENGINE` override the file, with `__`
//! separating nested keys (`ENGINE_PROCESS__MAX_ORIGINAL_PROCESS_NUM=8`).

use anyhow::Context;
use engine_contract_cache::ContractCacheConfig;
use engine_process_exports::ProcessConfig;
use engine_rpc_exports::RpcConfig;
use engine_scheduler_exports::SchedulerConfig;
use engine_time::EngineTime;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const ENV_MOUNT_DIR: &str = "ENGINE_MOUNT_DIR";
pub const ENV_CONFIG_FILE_NAME: &str = "ENGINE_CONFIG_FILE_NAME";
const ENV_PREFIX: &str = "ENGINE";
const DEFAULT_MOUNT_DIR: &str = "/mount";
const DEFAULT_CONFIG_FILE_NAME: &str = "engine.toml";
const SANDBOX_SOCKET_NAME: &str = "sandbox.sock";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    /// 0: error, 1: warn, 2: info, 3: debug, 4: trace
    pub level: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings { level: 2 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessSettings {
    pub max_original_process_num: usize,
    pub call_contract_depth: u32,
    pub release_rate: f64,
    pub max_tx_per_process: u64,
    pub idle_release_timeout: EngineTime,
    pub release_interval: EngineTime,
    pub bind_timeout: EngineTime,
    pub change_sandbox_timeout: EngineTime,
    pub close_timeout: EngineTime,
    pub sandbox_bin: PathBuf,
    /// run children under their pool user, needs root
    pub switch_user: bool,
    pub user_uid_base: u32,
    /// 0 sizes the user pool after both pool caps
    pub user_count: usize,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        ProcessSettings {
            max_original_process_num: 20,
            call_contract_depth: 5,
            release_rate: 0.3,
            max_tx_per_process: 0,
            idle_release_timeout: EngineTime::from_secs(60),
            release_interval: EngineTime::from_secs(5),
            bind_timeout: EngineTime::from_secs(10),
            change_sandbox_timeout: EngineTime::from_secs(5),
            close_timeout: EngineTime::from_secs(2),
            sandbox_bin: PathBuf::from("/usr/bin/engine-sandbox"),
            switch_user: true,
            user_uid_base: 10_000,
            user_count: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerSettings {
    pub queue_size: usize,
    pub default_tx_timeout: EngineTime,
    pub group_idle_grace: EngineTime,
    pub sweep_interval: EngineTime,
    pub bad_contract_retry_limit: u32,
    pub stale_drain_timeout: EngineTime,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            queue_size: 10_000,
            default_tx_timeout: EngineTime::from_secs(10),
            group_idle_grace: EngineTime::from_secs(120),
            sweep_interval: EngineTime::from_millis(500),
            bad_contract_retry_limit: 3,
            stale_drain_timeout: EngineTime::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContractSettings {
    pub cache_dir: PathBuf,
    pub fetch_timeout: EngineTime,
}

impl Default for ContractSettings {
    fn default() -> Self {
        ContractSettings {
            cache_dir: PathBuf::from("/tmp/engine/contracts"),
            fetch_timeout: EngineTime::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RpcSettings {
    pub chain_rpc_bind: SocketAddr,
    /// MB
    pub max_send_msg_size: usize,
    /// MB
    pub max_recv_msg_size: usize,
    pub write_timeout: EngineTime,
    pub register_timeout: EngineTime,
    pub flush_timeout: EngineTime,
    pub stream_channel_size: usize,
    pub max_protocol_violations: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        RpcSettings {
            chain_rpc_bind: SocketAddr::from(([0, 0, 0, 0], 22359)),
            max_send_msg_size: 20,
            max_recv_msg_size: 20,
            write_timeout: EngineTime::from_secs(5),
            register_timeout: EngineTime::from_secs(5),
            flush_timeout: EngineTime::from_secs(1),
            stream_channel_size: 1024,
            max_protocol_violations: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContractEnginePprofSettings {
    pub enable: bool,
    pub port: u16,
}

impl Default for ContractEnginePprofSettings {
    fn default() -> Self {
        ContractEnginePprofSettings {
            enable: false,
            port: 21215,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PprofSettings {
    pub contract_engine_pprof: ContractEnginePprofSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CgroupSettings {
    /// RSS cap of all sandboxes, 0 leaves the cgroup unlimited
    pub memory_limit_mb: u64,
}

impl Default for CgroupSettings {
    fn default() -> Self {
        CgroupSettings {
            memory_limit_mb: 4096,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub logging: LoggingSettings,
    pub process: ProcessSettings,
    pub scheduler: SchedulerSettings,
    pub contract: ContractSettings,
    pub rpc: RpcSettings,
    pub pprof: PprofSettings,
    pub cgroup: CgroupSettings,
    pub sandbox_rpc_dir: PathBuf,
    pub docker_mount_dir: PathBuf,
    pub config_file_name: String,
    /// size of the actor mailboxes
    pub channel_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            logging: Default::default(),
            process: Default::default(),
            scheduler: Default::default(),
            contract: Default::default(),
            rpc: Default::default(),
            pprof: Default::default(),
            cgroup: Default::default(),
            sandbox_rpc_dir: PathBuf::from("/tmp/engine/sock"),
            docker_mount_dir: PathBuf::from(DEFAULT_MOUNT_DIR),
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
            channel_size: 1024,
        }
    }
}

/// Where the configuration file is looked for: command line first, then
/// environment, then defaults.
pub fn config_path(mount_dir: Option<PathBuf>, file_name: Option<String>) -> PathBuf {
    let mount_dir = mount_dir
        .or_else(|| std::env::var_os(ENV_MOUNT_DIR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNT_DIR));
    let file_name = file_name
        .or_else(|| std::env::var(ENV_CONFIG_FILE_NAME).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE_NAME.to_string());
    mount_dir.join(file_name)
}

/// Loads the settings from `path` (optional) and the `ENGINE` environment.
pub fn load_settings(path: &Path) -> anyhow::Result<EngineSettings> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("could not read configuration {}", path.display()))?;
    let mut settings: EngineSettings = settings
        .try_deserialize()
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    if let (Some(dir), Some(name)) = (path.parent(), path.file_name()) {
        settings.docker_mount_dir = dir.to_path_buf();
        settings.config_file_name = name.to_string_lossy().into_owned();
    }
    Ok(settings)
}

impl EngineSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            queue_size: self.scheduler.queue_size,
            default_tx_timeout: self.scheduler.default_tx_timeout,
            call_contract_depth: self.process.call_contract_depth,
            group_idle_grace: self.scheduler.group_idle_grace,
            sweep_interval: self.scheduler.sweep_interval,
            bad_contract_retry_limit: self.scheduler.bad_contract_retry_limit,
            stale_drain_timeout: self.scheduler.stale_drain_timeout,
            channel_size: self.channel_size,
        }
    }

    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            max_original_process_num: self.process.max_original_process_num,
            call_contract_depth: self.process.call_contract_depth,
            release_rate: self.process.release_rate,
            idle_release_timeout: self.process.idle_release_timeout,
            release_interval: self.process.release_interval,
            max_tx_per_process: self.process.max_tx_per_process,
            bind_timeout: self.process.bind_timeout,
            change_sandbox_timeout: self.process.change_sandbox_timeout,
            close_timeout: self.process.close_timeout,
            sandbox_bin: self.process.sandbox_bin.clone(),
            sandbox_socket_path: self.sandbox_rpc_dir.join(SANDBOX_SOCKET_NAME),
            user_uid_base: self.process.user_uid_base,
            user_count: self.process.user_count,
            channel_size: self.channel_size,
        }
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            chain_rpc_bind: self.rpc.chain_rpc_bind,
            sandbox_rpc_dir: self.sandbox_rpc_dir.clone(),
            sandbox_socket_name: SANDBOX_SOCKET_NAME.to_string(),
            max_send_msg_size: self.rpc.max_send_msg_size,
            max_recv_msg_size: self.rpc.max_recv_msg_size,
            write_timeout: self.rpc.write_timeout,
            register_timeout: self.rpc.register_timeout,
            flush_timeout: self.rpc.flush_timeout,
            stream_channel_size: self.rpc.stream_channel_size,
            max_protocol_violations: self.rpc.max_protocol_violations,
        }
    }

    pub fn contract_cache_config(&self) -> ContractCacheConfig {
        ContractCacheConfig {
            cache_dir: self.contract.cache_dir.clone(),
            fetch_timeout: self.contract.fetch_timeout,
            channel_size: self.channel_size,
        }
    }

    /// address of the diagnostics endpoint, when enabled
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        let pprof = &self.pprof.contract_engine_pprof;
        pprof
            .enable
            .then(|| SocketAddr::from(([0, 0, 0, 0], pprof.port)))
    }
}
