// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Contract engine: runs smart-contract transactions submitted by chains in
//! a bounded pool of sandbox processes.

#![warn(unused_crate_dependencies)]

mod engine;
mod security;
mod settings;

use crate::engine::Engine;
use crate::security::HostHardening;
use crate::settings::{config_path, load_settings};
use anyhow::Context;
use clap::Parser;
use engine_process_worker::OsSandboxLauncher;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding the configuration file [env: ENGINE_MOUNT_DIR]
    #[arg(long)]
    mount_dir: Option<PathBuf>,
    /// Name of the configuration file [env: ENGINE_CONFIG_FILE_NAME]
    #[arg(long)]
    config_file: Option<String>,
    /// Skip the host hardening steps
    #[arg(long)]
    no_hardening: bool,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let path = config_path(args.mount_dir, args.config_file);
    let settings = load_settings(&path)?;
    engine_logging::init_tracing(settings.logging.level);
    info!("configuration loaded from {}", path.display());

    if !args.no_hardening {
        let hardening = HostHardening::new(settings.cgroup.memory_limit_mb);
        let failed = hardening.apply();
        info!(
            "host hardening done with {} failed steps, sandboxes accounted to {}",
            failed,
            hardening.cgroup_dir().display()
        );
    }

    let sandbox_bin = settings.process.sandbox_bin.clone();
    let switch_user = settings.process.switch_user;
    let engine = Engine::start(&settings, move |_| {
        Arc::new(OsSandboxLauncher::new(sandbox_bin, switch_user))
    })
    .await?;

    info!("chains connect on {}", engine.chain_addr());

    let mut interrupt = signal(SignalKind::interrupt()).context("could not listen to SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("could not listen to SIGTERM")?;
    let mut report = tokio::time::interval(STATS_REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                info!("interrupt signal received");
                break;
            }
            _ = terminate.recv() => {
                info!("terminate signal received");
                break;
            }
            _ = report.tick() => report_stats(&engine).await,
        }
    }
    engine.stop().await;
    Ok(())
}

async fn report_stats(engine: &Engine) {
    let census = engine.census().snapshot();
    match engine.scheduler().get_stats().await {
        Ok(stats) => info!(
            "{} request groups, {} queued and {} inflight txs, {} origin and {} cross processes",
            stats.request_groups,
            stats.queued_txs,
            stats.inflight_txs,
            census.live_orig,
            census.live_cross
        ),
        Err(e) => warn!("could not read scheduler stats: {}", e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // the subscriber may not be installed yet
            engine_logging::init_tracing(0);
            error!("engine failed: {:#}", e);
            eprintln!("engine failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests;
