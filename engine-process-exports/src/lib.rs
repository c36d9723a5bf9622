// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Exports of the process manager: its command sender, the read-only pool
//! census, process states and exit reports.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod census;
mod config;
mod controller;
mod error;
mod types;

pub use census::{CensusSnapshot, CensusWriter, PoolCensus};
pub use config::ProcessConfig;
pub use controller::{
    process_manager_channel, ProcessManagerCommand, ProcessManagerCommandSender,
    ProcessPoolManager,
};
pub use error::ProcessError;
pub use types::{EngineEvent, ProcessState, SandboxExitMsg};
