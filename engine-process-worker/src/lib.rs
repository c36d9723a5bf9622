// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Process manager: a bounded pool of sandbox child processes, each driven
//! by its own actor, retargeted between contracts when the pool is full.
//!
//! The origin pool holds at most `max_original_process_num` processes and
//! the cross pool `max_original_process_num * call_contract_depth`. Every
//! process runs under its own user taken from a fixed pool.

#![warn(unused_crate_dependencies)]

mod launcher;
mod process;
mod user_pool;
mod worker;

#[cfg(any(test, feature = "test-exports"))]
pub mod test_exports;

pub use launcher::{LaunchRequest, OsSandboxLauncher, SandboxChild, SandboxLauncher};
pub use user_pool::{User, UserPool};

use engine_process_exports::{
    PoolCensus, ProcessConfig, ProcessError, ProcessManagerCommand, ProcessPoolManager,
};
use engine_rpc_exports::SandboxRuntime;
use engine_scheduler_exports::SchedulerCommandSender;
use process::ProcessContext;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use worker::ProcessManagerWorker;

/// Starts the process manager on a mailbox created with `process_manager_channel`.
///
/// Fails when the configuration yields an empty pool or user range.
pub fn start_process_manager(
    cfg: ProcessConfig,
    command_rx: mpsc::Receiver<ProcessManagerCommand>,
    launcher: Arc<dyn SandboxLauncher>,
    runtime: SandboxRuntime,
    scheduler: SchedulerCommandSender,
) -> Result<(ProcessPoolManager, PoolCensus), ProcessError> {
    if cfg.max_original_process_num == 0 {
        return Err(ProcessError::InvalidConfig(
            "max_original_process_num must be at least 1".into(),
        ));
    }
    if !(0.0..=1.0).contains(&cfg.release_rate) {
        return Err(ProcessError::InvalidConfig(format!(
            "release_rate {} is not in [0, 1]",
            cfg.release_rate
        )));
    }
    let users = UserPool::new(cfg.user_uid_base, cfg.effective_user_count())?;
    debug!(
        "starting process manager: {} origin and {} cross processes, {} users",
        cfg.max_original_process_num,
        cfg.max_cross_process_num(),
        users.capacity()
    );

    let (census_writer, census) = PoolCensus::pair();
    let (event_tx, event_rx) = mpsc::channel(cfg.channel_size);
    let (manager_tx, manager_rx) = mpsc::channel(1);
    let ctx = ProcessContext {
        cfg,
        launcher,
        runtime,
        scheduler,
        event_tx,
    };
    let worker = ProcessManagerWorker::new(
        ctx,
        command_rx,
        manager_rx,
        event_rx,
        users,
        census_writer,
    );
    let join_handle = tokio::spawn(worker.run_loop());
    Ok((
        ProcessPoolManager {
            join_handle,
            manager_tx,
        },
        census,
    ))
}

#[cfg(test)]
mod tests;
