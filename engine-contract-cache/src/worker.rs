// Copyright (c) 2023 MASSA LABS <info@massa.net>

use crate::config::ContractCacheConfig;
use crate::controller::{ByteCodeOrigin, ContractCacheCommand};
use crate::error::ContractCacheError;
use crate::hd_cache::HdCache;
use engine_logging::engine_trace;
use engine_models::{ContractArtifact, ContractKey, EngineMessage, MessageType, UniqueTxKey};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type ArtifactResult = Result<ContractArtifact, ContractCacheError>;

struct CachedEntry {
    artifact: ContractArtifact,
    stale: bool,
}

struct PendingFetch {
    fetch_id: u64,
    tx_key: UniqueTxKey,
    min_file_version: i64,
    waiters: Vec<oneshot::Sender<ArtifactResult>>,
    /// bytes received, publication in progress
    writing: bool,
}

/// Events sent back to the worker by the tasks it spawns.
enum InternalEvent {
    Published {
        key: ContractKey,
        fetch_id: u64,
        result: ArtifactResult,
    },
    FetchTimeout {
        key: ContractKey,
        fetch_id: u64,
    },
}

pub(crate) struct ContractCacheWorker {
    cfg: ContractCacheConfig,
    hd_cache: HdCache,
    entries: HashMap<ContractKey, CachedEntry>,
    pending: HashMap<ContractKey, PendingFetch>,
    pending_by_tx: HashMap<UniqueTxKey, ContractKey>,
    next_fetch_id: u64,
    command_rx: mpsc::Receiver<ContractCacheCommand>,
    manager_rx: mpsc::Receiver<()>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
}

impl ContractCacheWorker {
    pub fn new(
        cfg: ContractCacheConfig,
        hd_cache: HdCache,
        existing: Vec<ContractArtifact>,
        command_rx: mpsc::Receiver<ContractCacheCommand>,
        manager_rx: mpsc::Receiver<()>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(cfg.channel_size);
        let entries = existing
            .into_iter()
            .map(|artifact| {
                (
                    artifact.key.clone(),
                    CachedEntry {
                        artifact,
                        stale: false,
                    },
                )
            })
            .collect();
        ContractCacheWorker {
            cfg,
            hd_cache,
            entries,
            pending: HashMap::new(),
            pending_by_tx: HashMap::new(),
            next_fetch_id: 0,
            command_rx,
            manager_rx,
            internal_tx,
            internal_rx,
        }
    }

    pub async fn run_loop(mut self) -> Result<(), ContractCacheError> {
        loop {
            tokio::select! {
                // stop first so a flood of commands cannot delay shutdown
                biased;
                _ = self.manager_rx.recv() => break,
                Some(event) = self.internal_rx.recv() => self.on_internal_event(event).await,
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
        }
        for (key, fetch) in self.pending.drain() {
            debug!("contract cache stopping with a pending fetch for {}", key);
            for waiter in fetch.waiters {
                let _ = waiter.send(Err(ContractCacheError::ChannelError(
                    "contract cache stopped".into(),
                )));
            }
        }
        Ok(())
    }

    fn on_command(&mut self, cmd: ContractCacheCommand) {
        match cmd {
            ContractCacheCommand::GetContract {
                key,
                min_file_version,
                origin,
                response_tx,
            } => self.on_get_contract(key, min_file_version, origin, response_tx),
            ContractCacheCommand::InvalidateIfStale {
                key,
                observed_file_version,
                response_tx,
            } => {
                let _ = response_tx.send(self.invalidate_if_stale(&key, observed_file_version));
            }
            ContractCacheCommand::ByteCodeResponse(msg) => self.on_bytecode_response(msg),
            ContractCacheCommand::GetCachedVersion { key, response_tx } => {
                let _ = response_tx.send(self.entries.get(&key).map(|e| e.artifact.file_version));
            }
        }
    }

    fn on_get_contract(
        &mut self,
        key: ContractKey,
        min_file_version: i64,
        origin: ByteCodeOrigin,
        response_tx: oneshot::Sender<ArtifactResult>,
    ) {
        if let Some(entry) = self.entries.get(&key) {
            if !entry.stale && entry.artifact.serves(min_file_version) {
                let _ = response_tx.send(Ok(entry.artifact.clone()));
                return;
            }
        }
        if let Some(fetch) = self.pending.get_mut(&key) {
            engine_trace!("contract_cache.get_contract.join", { "key": key.to_string() });
            fetch.min_file_version = fetch.min_file_version.max(min_file_version);
            fetch.waiters.push(response_tx);
            return;
        }

        self.next_fetch_id += 1;
        let fetch_id = self.next_fetch_id;
        let mut request = EngineMessage::new(
            MessageType::GetByteCodeReq,
            &key.chain_id,
            &origin.tx_key.tx_id,
        )
        .with_contract(&key);
        request.contract_index = min_file_version;
        if let Err(e) = origin.stream.try_send(request) {
            let _ = response_tx.send(Err(ContractCacheError::StreamError(e.to_string())));
            return;
        }
        engine_metrics::inc_bytecode_fetches();
        info!(
            "fetching bytecode of {} (min version {}) from {}",
            key,
            min_file_version,
            origin.stream.id()
        );

        self.pending_by_tx.insert(origin.tx_key.clone(), key.clone());
        self.pending.insert(
            key.clone(),
            PendingFetch {
                fetch_id,
                tx_key: origin.tx_key,
                min_file_version,
                waiters: vec![response_tx],
                writing: false,
            },
        );

        let internal_tx = self.internal_tx.clone();
        let fetch_timeout = self.cfg.fetch_timeout.to_duration();
        tokio::spawn(async move {
            tokio::time::sleep(fetch_timeout).await;
            let _ = internal_tx
                .send(InternalEvent::FetchTimeout { key, fetch_id })
                .await;
        });
    }

    fn invalidate_if_stale(&mut self, key: &ContractKey, observed_file_version: i64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if observed_file_version > entry.artifact.file_version => {
                debug!(
                    "bytecode of {} is stale: cached {} < observed {}",
                    key, entry.artifact.file_version, observed_file_version
                );
                entry.stale = true;
                true
            }
            _ => false,
        }
    }

    /// Finds the fetch a `GetByteCodeResp` answers: by contract identity first,
    /// then by the tx it was issued for.
    fn pending_key_for(&self, msg: &EngineMessage) -> Option<ContractKey> {
        if let Ok(key) = msg.contract_key() {
            if self.pending.contains_key(&key) {
                return Some(key);
            }
        }
        self.pending_by_tx.get(&msg.unique_tx_key()).cloned()
    }

    fn on_bytecode_response(&mut self, msg: EngineMessage) {
        let Some(key) = self.pending_key_for(&msg) else {
            debug!(
                "dropping GetByteCodeResp for tx {} without pending fetch",
                msg.unique_tx_key()
            );
            return;
        };
        let Some(fetch) = self.pending.get_mut(&key) else {
            return;
        };
        if fetch.writing {
            debug!("duplicate GetByteCodeResp for {}", key);
            return;
        }
        if !msg.is_ok() || msg.payload.is_empty() {
            let reason = if msg.message.is_empty() {
                format!("{} returned no bytecode", msg.status().as_str_name())
            } else {
                msg.message.clone()
            };
            warn!("bytecode fetch of {} failed: {}", key, reason);
            self.fail_fetch(&key, ContractCacheError::FetchFailed(reason));
            return;
        }

        let current = self
            .entries
            .get(&key)
            .map(|e| e.artifact.file_version)
            .unwrap_or(0);
        let file_version = fetch
            .min_file_version
            .max(msg.contract_index)
            .max(current);
        fetch.writing = true;
        let fetch_id = fetch.fetch_id;

        let hd_cache = self.hd_cache.clone();
        let internal_tx = self.internal_tx.clone();
        let payload = msg.payload;
        tokio::spawn(async move {
            let result = hd_cache
                .write_atomic(&key, file_version, &payload)
                .await
                .map(|path| ContractArtifact {
                    key: key.clone(),
                    path,
                    file_version,
                })
                .map_err(|e| ContractCacheError::WriteError(e.to_string()));
            let _ = internal_tx
                .send(InternalEvent::Published {
                    key,
                    fetch_id,
                    result,
                })
                .await;
        });
    }

    async fn on_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Published {
                key,
                fetch_id,
                result,
            } => {
                if self.pending.get(&key).map(|f| f.fetch_id) != Some(fetch_id) {
                    return;
                }
                match result {
                    Ok(artifact) => self.publish(artifact).await,
                    Err(e) => {
                        warn!("could not store bytecode of {}: {}", key, e);
                        self.fail_fetch(&key, e);
                    }
                }
            }
            InternalEvent::FetchTimeout { key, fetch_id } => {
                let timed_out = self
                    .pending
                    .get(&key)
                    .map(|f| f.fetch_id == fetch_id && !f.writing)
                    .unwrap_or(false);
                if timed_out {
                    warn!("bytecode fetch of {} timed out", key);
                    self.fail_fetch(&key, ContractCacheError::FetchTimeout(key.to_string()));
                }
            }
        }
    }

    async fn publish(&mut self, artifact: ContractArtifact) {
        let key = artifact.key.clone();
        let Some(fetch) = self.pending.remove(&key) else {
            return;
        };
        self.pending_by_tx.remove(&fetch.tx_key);

        let newer_cached = self
            .entries
            .get(&key)
            .filter(|entry| entry.artifact.file_version > artifact.file_version)
            .map(|entry| entry.artifact.clone());
        let published = match newer_cached {
            Some(cached) => cached,
            None => {
                self.entries.insert(
                    key.clone(),
                    CachedEntry {
                        artifact: artifact.clone(),
                        stale: false,
                    },
                );
                artifact
            }
        };
        info!(
            "published bytecode of {} at version {}",
            key, published.file_version
        );
        for waiter in fetch.waiters {
            let _ = waiter.send(Ok(published.clone()));
        }
        self.hd_cache
            .remove_older(&key, published.file_version)
            .await;
    }

    fn fail_fetch(&mut self, key: &ContractKey, err: ContractCacheError) {
        if let Some(fetch) = self.pending.remove(key) {
            self.pending_by_tx.remove(&fetch.tx_key);
            for waiter in fetch.waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }
}
