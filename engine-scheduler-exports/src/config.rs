// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_time::EngineTime;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// capacity of each request group lane
    pub queue_size: usize,
    /// deadline of txs that carry no timeout
    pub default_tx_timeout: EngineTime,
    /// deepest allowed cross-contract nesting, chain-originated txs being at depth 1
    pub call_contract_depth: u32,
    /// how long an unused request group survives
    pub group_idle_grace: EngineTime,
    /// period of the deadline and idle-group sweep
    pub sweep_interval: EngineTime,
    /// bytecode refreshes allowed per tx before it is answered `Transient`
    pub bad_contract_retry_limit: u32,
    /// how long txs pinned to an outdated bytecode may still run on it
    pub stale_drain_timeout: EngineTime,
    /// size of the command channel
    pub channel_size: usize,
}
