// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_models::ProcessName;
use std::fmt;

/// Lifecycle of a sandbox process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessState {
    /// child started, waiting for its sandbox stream
    Created,
    /// stream bound, no tx in flight
    Ready,
    /// exactly one tx in flight
    Busy,
    /// loading bytecode
    Changing,
    /// draining, no new work accepted
    Closing,
    /// terminal
    Exited,
}

impl ProcessState {
    /// whether the process still counts against its pool
    pub fn is_live(&self) -> bool {
        !matches!(self, ProcessState::Exited)
    }

    /// whether the process can take a queued tx without a new process
    pub fn accepts_work(&self) -> bool {
        matches!(
            self,
            ProcessState::Created | ProcessState::Ready | ProcessState::Changing
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Created => "created",
            ProcessState::Ready => "ready",
            ProcessState::Busy => "busy",
            ProcessState::Changing => "changing",
            ProcessState::Closing => "closing",
            ProcessState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Report of a process that reached `Exited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxExitMsg {
    /// chain of the contract the process was serving
    pub chain_id: String,
    /// contract name
    pub contract_name: String,
    /// contract version
    pub contract_version: String,
    /// bytecode generation loaded when it exited
    pub contract_index: i64,
    /// the process
    pub process_name: ProcessName,
    /// why it exited, `None` for a requested close
    pub err: Option<String>,
}

/// Events fed to the process manager by other components
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// a chain stream closed; processes tied to these chains can be recycled
    ConnectionStopped {
        /// chains that submitted txs on the stream
        chain_ids: Vec<String>,
    },
}
