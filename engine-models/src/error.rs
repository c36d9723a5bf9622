// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Result alias for model conversions
pub type ModelsResult<T, E = ModelsError> = core::result::Result<T, E>;

/// models error
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelsError {
    /// invalid contract key: {0}
    InvalidContractKey(String),
    /// invalid process name: {0}
    InvalidProcessName(String),
    /// missing field in message: {0}
    MissingField(&'static str),
    /// unexpected message type: {0}
    UnexpectedMessageType(String),
}
