// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use engine_models::ModelsError;
use thiserror::Error;

/// RPC error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum RpcError {
    /// An error occurred during channel communication: {0}
    ChannelError(String),
    /// IO error : {0}
    IOError(#[from] std::io::Error),
    /// could not decode message: {0}
    DecodeError(#[from] prost::DecodeError),
    /// A tokio task has crashed err:{0}
    TokioTaskJoinError(#[from] tokio::task::JoinError),
    /// Protocol err:{0}
    ProtocolError(String),
    /// sandbox registered with an unknown process name: {0}
    UnknownProcess(String),
    /// write timed out after {0}
    WriteTimeout(engine_time::EngineTime),
    /// models error: {0}
    ModelsError(#[from] ModelsError),
}
