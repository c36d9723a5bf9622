// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Shared plumbing of the chain-facing and sandbox-facing RPC surfaces:
//! framing, the per-stream writer handle and the sandbox runtime registry.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod binders;
mod chain_stream;
mod config;
mod error;
mod runtime;

pub use binders::{ReadBinder, WriteBinder};
pub use chain_stream::{ChainStream, ChainStreamId};
pub use config::RpcConfig;
pub use error::RpcError;
pub use runtime::{PendingBind, SandboxLink, SandboxRuntime};

#[cfg(test)]
mod tests;
