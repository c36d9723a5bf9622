// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Request scheduler: fans chain txs and cross-contract calls into per-contract
//! request groups, tracks their notifiers and routes every outcome back
//! exactly once.

#![warn(unused_crate_dependencies)]

mod request_group;
mod worker;

use engine_contract_cache::ContractCacheController;
use engine_process_exports::{PoolCensus, ProcessManagerCommandSender};
use engine_scheduler_exports::{SchedulerCommand, SchedulerConfig, SchedulerManager};
use tokio::sync::mpsc;
use tracing::debug;
use worker::SchedulerWorker;

/// Starts the scheduler on a mailbox created with `scheduler_channel`.
pub fn start_scheduler_worker(
    cfg: SchedulerConfig,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    process_manager: ProcessManagerCommandSender,
    contract_cache: ContractCacheController,
    census: PoolCensus,
) -> SchedulerManager {
    debug!("starting scheduler worker");
    let (manager_tx, manager_rx) = mpsc::channel(1);
    let worker = SchedulerWorker::new(
        cfg,
        command_rx,
        manager_rx,
        process_manager,
        contract_cache,
        census,
    );
    let join_handle = tokio::spawn(worker.run_loop());
    SchedulerManager {
        join_handle,
        manager_tx,
    }
}

#[cfg(test)]
mod tests;
