// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::ProcessError;
use crate::types::EngineEvent;
use engine_models::{ContractArtifact, ContractKey};
use engine_scheduler_exports::Lane;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Commands that the process manager handles
#[derive(Debug)]
pub enum ProcessManagerCommand {
    /// Demand for processes serving a lane.
    RequestProcesses {
        /// contract of the lane
        key: ContractKey,
        /// pool to serve it from
        is_orig: bool,
        /// queued txs without a process to take them
        want_n: usize,
        /// lane the processes pull from
        lane: Lane,
        /// bytecode to load
        artifact: ContractArtifact,
    },
    /// Event from another component.
    Event(EngineEvent),
}

/// Creates the process manager mailbox, see `scheduler_channel`.
pub fn process_manager_channel(
    channel_size: usize,
) -> (
    ProcessManagerCommandSender,
    mpsc::Receiver<ProcessManagerCommand>,
) {
    let (tx, rx) = mpsc::channel(channel_size);
    (ProcessManagerCommandSender(tx), rx)
}

/// Process manager command sender
#[derive(Debug, Clone)]
pub struct ProcessManagerCommandSender(pub mpsc::Sender<ProcessManagerCommand>);

impl ProcessManagerCommandSender {
    /// Signals demand without waiting. A full mailbox drops the signal, the
    /// next enqueue or the next process going Ready renews it.
    pub fn request_processes(
        &self,
        key: ContractKey,
        is_orig: bool,
        want_n: usize,
        lane: Lane,
        artifact: ContractArtifact,
    ) -> Result<(), ProcessError> {
        match self.0.try_send(ProcessManagerCommand::RequestProcesses {
            key,
            is_orig,
            want_n,
            lane,
            artifact,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Failed to send ProcessManagerCommand RequestProcesses channel full");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ProcessError::ChannelError(
                "could not send RequestProcesses command".into(),
            )),
        }
    }

    /// Forwards an event without waiting.
    pub fn notify_event(&self, event: EngineEvent) -> Result<(), ProcessError> {
        match self.0.try_send(ProcessManagerCommand::Event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Failed to send ProcessManagerCommand Event channel full");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ProcessError::ChannelError(
                "could not send Event command".into(),
            )),
        }
    }
}

/// Process manager handle
pub struct ProcessPoolManager {
    /// process manager handle
    pub join_handle: JoinHandle<Result<(), ProcessError>>,
    /// management commands
    pub manager_tx: mpsc::Sender<()>,
}

impl ProcessPoolManager {
    /// Closes every process, waits for their exit and stops the manager.
    pub async fn stop(self) -> Result<(), ProcessError> {
        info!("stopping process manager...");
        drop(self.manager_tx);
        self.join_handle.await??;
        info!("process manager stopped");
        Ok(())
    }
}
