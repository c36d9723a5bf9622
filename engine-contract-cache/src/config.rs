// Copyright (c) 2023 MASSA LABS <info@massa.net>

use engine_time::EngineTime;
use std::path::PathBuf;

/// Contract cache configuration
#[derive(Debug, Clone)]
pub struct ContractCacheConfig {
    /// Root of the on-disk bytecode cache
    pub cache_dir: PathBuf,
    /// How long a `GetByteCodeReq` may stay unanswered before its waiters fail
    pub fetch_timeout: EngineTime,
    /// Size of the command channel
    pub channel_size: usize,
}
