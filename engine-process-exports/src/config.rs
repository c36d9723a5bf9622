// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_time::EngineTime;
use std::path::PathBuf;

/// Process manager configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// cap of the origin pool
    pub max_original_process_num: usize,
    /// deepest cross-contract nesting; the cross pool cap is `max_original_process_num` times this
    pub call_contract_depth: u32,
    /// fraction in [0,1] of idle processes closed per sweep
    pub release_rate: f64,
    /// a process Ready for this long is idle
    pub idle_release_timeout: EngineTime,
    /// period of the idle sweep
    pub release_interval: EngineTime,
    /// txs a process runs before closing itself, 0 for no budget
    pub max_tx_per_process: u64,
    /// time a child has to open its sandbox stream
    pub bind_timeout: EngineTime,
    /// time a sandbox has to answer `ChangeSandboxReq`
    pub change_sandbox_timeout: EngineTime,
    /// time a killed child has to exit
    pub close_timeout: EngineTime,
    /// sandbox executable
    pub sandbox_bin: PathBuf,
    /// socket the sandbox connects to
    pub sandbox_socket_path: PathBuf,
    /// first uid (and gid) of the sandbox users
    pub user_uid_base: u32,
    /// size of the user pool, 0 to size it after both pool caps
    pub user_count: usize,
    /// size of the command and event channels
    pub channel_size: usize,
}

impl ProcessConfig {
    /// cap of the cross pool
    pub fn max_cross_process_num(&self) -> usize {
        self.max_original_process_num
            .saturating_mul(self.call_contract_depth as usize)
    }

    /// cap of the given pool
    pub fn max_process_num(&self, is_orig: bool) -> usize {
        if is_orig {
            self.max_original_process_num
        } else {
            self.max_cross_process_num()
        }
    }

    /// number of sandbox users to allocate
    pub fn effective_user_count(&self) -> usize {
        if self.user_count > 0 {
            self.user_count
        } else {
            self.max_original_process_num
                .saturating_add(self.max_cross_process_num())
        }
    }
}
