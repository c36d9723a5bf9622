// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::{SandboxLink, SandboxRuntime};
use engine_models::{EngineMessage, MessageType, ProcessName, UniqueTxKey};
use tokio::sync::{mpsc, oneshot};

#[tokio::test]
async fn test_bind_is_claimed_once() {
    let runtime = SandboxRuntime::new();
    let name = ProcessName::new(true, 1);
    let (inbound_tx, _inbound_rx) = mpsc::channel(4);
    let link_rx = runtime.expect_bind(&name, inbound_tx);
    assert_eq!(runtime.pending_binds(), 1);

    let pending = runtime.take_bind(name.as_str()).unwrap();
    assert!(runtime.take_bind(name.as_str()).is_none());

    let (writer, _writer_rx) = mpsc::channel(4);
    let (_closed_tx, closed) = oneshot::channel();
    pending.link_tx.send(SandboxLink { writer, closed }).unwrap();
    assert!(link_rx.await.is_ok());
    assert_eq!(runtime.pending_binds(), 0);
}

#[tokio::test]
async fn test_cancelled_bind_is_unknown() {
    let runtime = SandboxRuntime::new();
    let name = ProcessName::new(false, 4);
    let (inbound_tx, _inbound_rx) = mpsc::channel(4);
    let link_rx = runtime.expect_bind(&name, inbound_tx);
    runtime.cancel_bind(&name);
    assert!(runtime.take_bind(name.as_str()).is_none());
    assert!(link_rx.await.is_err());
}

#[tokio::test]
async fn test_notifier_routing() {
    let runtime = SandboxRuntime::new();
    let key = UniqueTxKey::new("chain1", "T1");
    let (tx, mut rx) = mpsc::channel(4);
    runtime.register_sandbox_msg_notify(key.clone(), tx);
    assert_eq!(runtime.registered_notifiers(), 1);

    let notifier = runtime.sandbox_msg_notifier(&key).unwrap();
    notifier
        .send(EngineMessage::new(MessageType::GetStateReq, "chain1", "T1"))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap().msg_type(), MessageType::GetStateReq);

    runtime.deregister_sandbox_msg_notify(&key);
    assert!(runtime.sandbox_msg_notifier(&key).is_none());
    assert!(runtime
        .sandbox_msg_notifier(&UniqueTxKey::new("chain2", "T1"))
        .is_none());
}
