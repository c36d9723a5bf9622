// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Process error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum ProcessError {
    /// An error occurred during channel communication: {0}
    ChannelError(String),
    /// A tokio task has crashed err:{0}
    TokioTaskJoinError(#[from] tokio::task::JoinError),
    /// IO error : {0}
    IOError(#[from] std::io::Error),
    /// invalid process configuration: {0}
    InvalidConfig(String),
    /// could not launch sandbox: {0}
    LaunchError(String),
    /// user pool exhausted
    UserPoolExhausted,
}
