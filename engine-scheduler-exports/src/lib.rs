// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Exports of the request scheduler: its command sender, the lanes processes
//! pull work from, and the shapes of queued txs and their notifiers.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod commands;
mod config;
mod controller;
mod error;
mod lane;

pub use commands::{ParentTx, SchedulerCommand, SchedulerStats, TxNotifier};
pub use config::SchedulerConfig;
pub use controller::{scheduler_channel, SchedulerCommandSender, SchedulerManager};
pub use error::SchedulerError;
pub use lane::{ArtifactCell, Lane, LatestArtifact, QueuedTx};
