// Copyright (c) 2023 MASSA LABS <info@massa.net>

use crate::config::ContractCacheConfig;
use crate::error::ContractCacheError;
use crate::hd_cache::HdCache;
use crate::worker::ContractCacheWorker;
use engine_models::{ContractArtifact, ContractKey, EngineMessage, UniqueTxKey};
use engine_rpc_exports::ChainStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where a missing bytecode is asked for: the chain stream that originated
/// the tx needing it.
#[derive(Debug, Clone)]
pub struct ByteCodeOrigin {
    /// tx on whose behalf the fetch is made, echoed by the chain in `GetByteCodeResp`
    pub tx_key: UniqueTxKey,
    /// stream of the chain that submitted the root tx
    pub stream: ChainStream,
}

/// Commands accepted by the contract cache
#[derive(Debug)]
pub enum ContractCacheCommand {
    /// Artifact of `key` with `file_version >= min_file_version`, fetched if needed.
    GetContract {
        key: ContractKey,
        min_file_version: i64,
        origin: ByteCodeOrigin,
        response_tx: oneshot::Sender<Result<ContractArtifact, ContractCacheError>>,
    },
    /// Marks the entry of `key` stale when `observed_file_version` is newer than the cached one.
    InvalidateIfStale {
        key: ContractKey,
        observed_file_version: i64,
        response_tx: oneshot::Sender<bool>,
    },
    /// `GetByteCodeResp` received from a chain.
    ByteCodeResponse(EngineMessage),
    /// Currently published `file_version` of `key`.
    GetCachedVersion {
        key: ContractKey,
        response_tx: oneshot::Sender<Option<i64>>,
    },
}

/// Cloneable handle to the contract cache
#[derive(Clone)]
pub struct ContractCacheController(pub mpsc::Sender<ContractCacheCommand>);

impl ContractCacheController {
    /// Returns an artifact at least as recent as `min_file_version`.
    /// Concurrent calls for the same missing key share one fetch.
    pub async fn get_contract(
        &self,
        key: ContractKey,
        min_file_version: i64,
        origin: ByteCodeOrigin,
    ) -> Result<ContractArtifact, ContractCacheError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.0
            .send(ContractCacheCommand::GetContract {
                key,
                min_file_version,
                origin,
                response_tx,
            })
            .await
            .map_err(|_| {
                ContractCacheError::ChannelError("could not send GetContract command".into())
            })?;
        response_rx.await.map_err(|_| {
            ContractCacheError::ChannelError("could not receive GetContract response".into())
        })?
    }

    /// Returns whether the entry was marked stale.
    pub async fn invalidate_if_stale(
        &self,
        key: ContractKey,
        observed_file_version: i64,
    ) -> Result<bool, ContractCacheError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.0
            .send(ContractCacheCommand::InvalidateIfStale {
                key,
                observed_file_version,
                response_tx,
            })
            .await
            .map_err(|_| {
                ContractCacheError::ChannelError("could not send InvalidateIfStale command".into())
            })?;
        response_rx.await.map_err(|_| {
            ContractCacheError::ChannelError("could not receive InvalidateIfStale response".into())
        })
    }

    /// Hands a `GetByteCodeResp` to the pending fetch it answers.
    pub async fn on_bytecode_response(&self, msg: EngineMessage) -> Result<(), ContractCacheError> {
        self.0
            .send(ContractCacheCommand::ByteCodeResponse(msg))
            .await
            .map_err(|_| {
                ContractCacheError::ChannelError("could not send ByteCodeResponse command".into())
            })
    }

    /// Currently published version of `key`, if any.
    pub async fn cached_version(&self, key: ContractKey) -> Result<Option<i64>, ContractCacheError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.0
            .send(ContractCacheCommand::GetCachedVersion { key, response_tx })
            .await
            .map_err(|_| {
                ContractCacheError::ChannelError("could not send GetCachedVersion command".into())
            })?;
        response_rx.await.map_err(|_| {
            ContractCacheError::ChannelError("could not receive GetCachedVersion response".into())
        })
    }
}

/// Stops the contract cache worker
pub struct ContractCacheManager {
    join_handle: JoinHandle<Result<(), ContractCacheError>>,
    manager_tx: mpsc::Sender<()>,
}

impl ContractCacheManager {
    /// Stop the contract cache worker. Pending fetches fail with a channel error.
    pub async fn stop(self) -> Result<(), ContractCacheError> {
        drop(self.manager_tx);
        self.join_handle
            .await
            .map_err(|e| ContractCacheError::ChannelError(e.to_string()))??;
        info!("contract cache stopped");
        Ok(())
    }
}

/// Starts the contract cache worker.
///
/// Artifacts already present under `cache_dir` are adopted at their stored version.
pub fn start_contract_cache(
    cfg: ContractCacheConfig,
) -> Result<(ContractCacheController, ContractCacheManager), ContractCacheError> {
    debug!("starting contract cache in {}", cfg.cache_dir.display());
    let hd_cache = HdCache::new(cfg.cache_dir.clone());
    let existing = hd_cache
        .scan()
        .map_err(|e| ContractCacheError::WriteError(e.to_string()))?;
    if !existing.is_empty() {
        info!("adopted {} cached contracts", existing.len());
    }

    let (command_tx, command_rx) = mpsc::channel(cfg.channel_size);
    let (manager_tx, manager_rx) = mpsc::channel(1);
    let worker = ContractCacheWorker::new(cfg, hd_cache, existing, command_rx, manager_rx);
    let join_handle = tokio::spawn(worker.run_loop());

    Ok((
        ContractCacheController(command_tx),
        ContractCacheManager {
            join_handle,
            manager_tx,
        },
    ))
}
