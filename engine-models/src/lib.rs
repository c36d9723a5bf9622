// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Identifiers and the wire envelope shared by every engine component.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

pub use contract::ContractArtifact;
pub use error::ModelsError;
pub use keys::{ContractKey, ProcessName, UniqueTxKey};
pub use message::{EngineMessage, MessageType, TxStatus};

/// engine wide constants
pub mod constants;
mod contract;
/// models error
pub mod error;
mod keys;
mod message;

#[cfg(test)]
mod tests;
