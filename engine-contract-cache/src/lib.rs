// Copyright (c) 2023 MASSA LABS <info@massa.net>
//! Contract manager: fetches contract bytecode from the chain that asked for
//! it, stores it on local disk and versions it.
//!
//! One actor owns the cache directory. Callers asking for the same missing
//! contract share a single `GetByteCodeReq`; bytes are published with a
//! temp file and a rename, and the `file_version` of a key never decreases.

#![warn(unused_crate_dependencies)]

pub mod config;
pub mod controller;
pub mod error;
mod hd_cache;
mod worker;

pub use config::ContractCacheConfig;
pub use controller::{
    start_contract_cache, ByteCodeOrigin, ContractCacheCommand, ContractCacheController,
    ContractCacheManager,
};
pub use error::ContractCacheError;

#[cfg(test)]
mod tests;
