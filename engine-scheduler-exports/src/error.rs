// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use engine_models::ModelsError;
use thiserror::Error;

/// Scheduler error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum SchedulerError {
    /// An error occurred during channel communication: {0}
    ChannelError(String),
    /// A tokio task has crashed err:{0}
    TokioTaskJoinError(#[from] tokio::task::JoinError),
    /// invalid tx: {0}
    InvalidTx(String),
    /// models error: {0}
    ModelsError(#[from] ModelsError),
}
