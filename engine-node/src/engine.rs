// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::settings::EngineSettings;
use anyhow::Context;
use engine_contract_cache::{start_contract_cache, ContractCacheManager};
use engine_metrics::MetricsStopper;
use engine_process_exports::{process_manager_channel, PoolCensus, ProcessPoolManager};
use engine_process_worker::{start_process_manager, SandboxLauncher};
use engine_rpc_exports::SandboxRuntime;
use engine_rpc_worker::{
    start_chain_rpc, start_sandbox_rpc, ChainRpcManager, SandboxRpcManager, SandboxStreamConnector,
};
use engine_scheduler_exports::{scheduler_channel, SchedulerCommandSender, SchedulerManager};
use engine_scheduler_worker::start_scheduler_worker;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Every running component of the engine.
pub struct Engine {
    scheduler: SchedulerCommandSender,
    census: PoolCensus,
    chain_addr: SocketAddr,
    chain_rpc: ChainRpcManager,
    scheduler_manager: SchedulerManager,
    process_manager: ProcessPoolManager,
    sandbox_rpc: SandboxRpcManager,
    contract_cache_manager: ContractCacheManager,
    metrics: Option<MetricsStopper>,
}

impl Engine {
    /// Starts the components leaves first. The chain listener opens last,
    /// once everything it feeds is running.
    ///
    /// `launcher` gets the connector of the sandbox service, for launchers
    /// that do not go through the socket.
    pub async fn start(
        settings: &EngineSettings,
        launcher: impl FnOnce(SandboxStreamConnector) -> Arc<dyn SandboxLauncher>,
    ) -> anyhow::Result<Engine> {
        let runtime = SandboxRuntime::new();
        let sandbox_rpc = start_sandbox_rpc(settings.rpc_config(), runtime.clone())
            .await
            .context("could not start the sandbox rpc service")?;
        let launcher = launcher(sandbox_rpc.connector());

        let (contract_cache, contract_cache_manager) =
            start_contract_cache(settings.contract_cache_config())
                .context("could not start the contract cache")?;

        let scheduler_config = settings.scheduler_config();
        let process_config = settings.process_config();
        let (scheduler, scheduler_rx) = scheduler_channel(scheduler_config.channel_size);
        let (process_manager_sender, process_manager_rx) =
            process_manager_channel(process_config.channel_size);
        let (process_manager, census) = start_process_manager(
            process_config,
            process_manager_rx,
            launcher,
            runtime,
            scheduler.clone(),
        )
        .context("could not start the process manager")?;
        let scheduler_manager = start_scheduler_worker(
            scheduler_config,
            scheduler_rx,
            process_manager_sender,
            contract_cache,
            census.clone(),
        );

        let chain_rpc = start_chain_rpc(settings.rpc_config(), scheduler.clone())
            .await
            .context("could not start the chain rpc service")?;
        let chain_addr = chain_rpc.local_addr();

        let metrics = settings.metrics_addr().map(|addr| {
            info!("serving metrics on {}", addr);
            engine_metrics::bind_metrics(addr)
        });

        info!("engine started, chains connect on {}", chain_addr);
        Ok(Engine {
            scheduler,
            census,
            chain_addr,
            chain_rpc,
            scheduler_manager,
            process_manager,
            sandbox_rpc,
            contract_cache_manager,
            metrics,
        })
    }

    pub fn scheduler(&self) -> &SchedulerCommandSender {
        &self.scheduler
    }

    pub fn census(&self) -> &PoolCensus {
        &self.census
    }

    /// connector for in-memory chain streams
    #[cfg(test)]
    pub fn chain_connector(&self) -> engine_rpc_worker::ChainStreamConnector {
        self.chain_rpc.connector()
    }

    pub fn chain_addr(&self) -> SocketAddr {
        self.chain_addr
    }

    /// Stops the components in dependency order: chains first so no new
    /// work comes in, the contract cache last.
    pub async fn stop(self) {
        info!("stopping engine...");
        if let Err(e) = self.chain_rpc.stop().await {
            warn!("chain rpc did not stop cleanly: {}", e);
        }
        if let Err(e) = self.scheduler_manager.stop().await {
            warn!("scheduler did not stop cleanly: {}", e);
        }
        if let Err(e) = self.process_manager.stop().await {
            warn!("process manager did not stop cleanly: {}", e);
        }
        if let Err(e) = self.sandbox_rpc.stop().await {
            warn!("sandbox rpc did not stop cleanly: {}", e);
        }
        if let Err(e) = self.contract_cache_manager.stop().await {
            warn!("contract cache did not stop cleanly: {}", e);
        }
        if let Some(mut metrics) = self.metrics {
            metrics.stop();
        }
        info!("engine stopped");
    }
}
