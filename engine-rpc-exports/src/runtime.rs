// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_models::{EngineMessage, ProcessName, UniqueTxKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A sandbox stream bound to its process.
#[derive(Debug)]
pub struct SandboxLink {
    /// inbound channel of the stream writer task
    pub writer: mpsc::Sender<EngineMessage>,
    /// resolves once the stream is gone, with the reason when it failed
    pub closed: oneshot::Receiver<Option<String>>,
}

/// A process waiting for its sandbox to connect.
#[derive(Debug)]
pub struct PendingBind {
    /// where control messages of the stream go (messages not bound to a tx)
    pub inbound: mpsc::Sender<EngineMessage>,
    /// completes the bind
    pub link_tx: oneshot::Sender<SandboxLink>,
}

#[derive(Default)]
struct RuntimeInner {
    binds: HashMap<String, PendingBind>,
    notifiers: HashMap<UniqueTxKey, mpsc::Sender<EngineMessage>>,
}

/// Registry shared by processes and the sandbox RPC service.
///
/// Processes announce the name their child will register with and the txs
/// they run; the service uses it to bind streams and route callbacks.
/// Critical sections never await.
#[derive(Clone, Default)]
pub struct SandboxRuntime {
    inner: Arc<Mutex<RuntimeInner>>,
}

impl SandboxRuntime {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces a process whose sandbox is about to connect.
    /// The returned receiver completes when the sandbox registers.
    pub fn expect_bind(
        &self,
        name: &ProcessName,
        inbound: mpsc::Sender<EngineMessage>,
    ) -> oneshot::Receiver<SandboxLink> {
        let (link_tx, link_rx) = oneshot::channel();
        self.inner
            .lock()
            .binds
            .insert(name.as_str().to_string(), PendingBind { inbound, link_tx });
        link_rx
    }

    /// Claims the pending bind of a registering sandbox.
    pub fn take_bind(&self, process_name: &str) -> Option<PendingBind> {
        self.inner.lock().binds.remove(process_name)
    }

    /// Forgets a pending bind, e.g. when the child failed to start.
    pub fn cancel_bind(&self, name: &ProcessName) {
        self.inner.lock().binds.remove(name.as_str());
    }

    /// number of processes waiting for their sandbox
    pub fn pending_binds(&self) -> usize {
        self.inner.lock().binds.len()
    }

    /// Routes the sandbox callbacks of a tx to `notifier`.
    pub fn register_sandbox_msg_notify(
        &self,
        key: UniqueTxKey,
        notifier: mpsc::Sender<EngineMessage>,
    ) {
        if self.inner.lock().notifiers.insert(key.clone(), notifier).is_some() {
            debug!("replaced sandbox notifier of tx {}", key);
        }
    }

    /// Stops routing the callbacks of a tx. Later messages for it are dropped.
    pub fn deregister_sandbox_msg_notify(&self, key: &UniqueTxKey) {
        self.inner.lock().notifiers.remove(key);
    }

    /// Notifier of a tx, if one is registered.
    pub fn sandbox_msg_notifier(&self, key: &UniqueTxKey) -> Option<mpsc::Sender<EngineMessage>> {
        self.inner.lock().notifiers.get(key).cloned()
    }

    /// number of txs with a registered notifier
    pub fn registered_notifiers(&self) -> usize {
        self.inner.lock().notifiers.len()
    }
}
