// Copyright (c) 2023 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Contract cache error
///
/// Cloneable so a single fetch outcome can be shared by every waiter.
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractCacheError {
    /// An error occurred during channel communication: {0}
    ChannelError(String),
    /// chain refused the bytecode: {0}
    FetchFailed(String),
    /// bytecode fetch timed out for {0}
    FetchTimeout(String),
    /// could not write bytecode: {0}
    WriteError(String),
    /// chain stream unusable: {0}
    StreamError(String),
}
