// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! The two stream surfaces of the engine.
//!
//! The chain service accepts chain streams over TCP and feeds their
//! messages to the scheduler. The sandbox service accepts sandbox streams
//! over a unix socket, binds each one to the process that launched it and
//! routes tx callbacks through the [`engine_rpc_exports::SandboxRuntime`].
//!
//! Both services also take in-memory streams through their connector,
//! which is how tests drive them.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod chain_service;
mod sandbox_service;
mod writer;

#[cfg(any(test, feature = "test-exports"))]
pub mod test_exports;

pub use chain_service::{start_chain_rpc, ChainRpcManager, ChainStreamConnector};
pub use sandbox_service::{start_sandbox_rpc, SandboxRpcManager, SandboxStreamConnector};

#[cfg(test)]
mod tests;
