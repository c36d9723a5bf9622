// Copyright (c) 2022 MASSA LABS <info@massa.net>

use super::tools::{rpc_config, Peer};
use crate::start_chain_rpc;
use crate::test_exports::ChainClient;
use engine_models::{ContractKey, EngineMessage, MessageType, TxStatus};
use engine_scheduler_exports::{scheduler_channel, SchedulerCommand};
use engine_time::EngineTime;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

fn key() -> ContractKey {
    ContractKey::new("chain1", "counter", "v1").unwrap()
}

async fn next_command(rx: &mut mpsc::Receiver<SchedulerCommand>) -> SchedulerCommand {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("scheduler got nothing in time")
        .expect("scheduler mailbox closed")
}

#[tokio::test]
async fn test_tx_request_reaches_scheduler_and_response_reaches_chain() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, mut scheduler_rx) = scheduler_channel(16);
    let manager = start_chain_rpc(rpc_config(dir.path()), scheduler).await.unwrap();

    let mut client = ChainClient::connect(&manager.connector()).unwrap();
    client.submit("T1", &key(), b"args").await.unwrap();
    let SchedulerCommand::SubmitTx { msg, stream } = next_command(&mut scheduler_rx).await else {
        panic!("expected SubmitTx");
    };
    assert_eq!(msg.tx_id, "T1");
    assert_eq!(msg.payload, b"args".to_vec());

    stream
        .try_send(msg.tx_response(TxStatus::Ok, "").with_payload(b"done".to_vec()))
        .unwrap();
    let resp = client.next_response(Duration::from_secs(2)).await.unwrap();
    assert_eq!(resp.msg_type(), MessageType::TxResponse);
    assert_eq!(resp.payload, b"done".to_vec());

    drop(stream);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_unexpected_message_closes_chain_stream() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, mut scheduler_rx) = scheduler_channel(16);
    let manager = start_chain_rpc(rpc_config(dir.path()), scheduler).await.unwrap();

    let mut client = ChainClient::connect(&manager.connector()).unwrap();
    client
        .send(&EngineMessage::new(MessageType::CallContractResp, "chain1", "T1"))
        .await
        .unwrap();
    let err = client.recv(Duration::from_secs(2)).await.unwrap();
    assert_eq!(err.msg_type(), MessageType::Error);
    assert_eq!(err.status(), TxStatus::ProtocolError);
    assert!(matches!(
        next_command(&mut scheduler_rx).await,
        SchedulerCommand::ConnectionStopped { .. }
    ));
    assert!(client.recv(Duration::from_secs(2)).await.is_none());
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_chain_that_stops_reading_is_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = rpc_config(dir.path());
    cfg.write_timeout = EngineTime::from_millis(100);
    let (scheduler, mut scheduler_rx) = scheduler_channel(16);
    let manager = start_chain_rpc(cfg, scheduler).await.unwrap();

    let (client_end, server_end) = tokio::io::duplex(64);
    manager.connector().attach(server_end).unwrap();
    let mut peer = Peer::new(client_end);
    let request = EngineMessage::new(MessageType::TxRequest, "chain1", "T1").with_contract(&key());
    peer.send(&request).await;
    let SchedulerCommand::SubmitTx { msg, stream } = next_command(&mut scheduler_rx).await else {
        panic!("expected SubmitTx");
    };

    // more than the pipe holds, and the peer never reads
    stream
        .try_send(msg.tx_response(TxStatus::Ok, "").with_payload(vec![7; 64 * 1024]))
        .unwrap();
    let SchedulerCommand::ConnectionStopped { stream_id, chain_ids } =
        next_command(&mut scheduler_rx).await
    else {
        panic!("expected ConnectionStopped");
    };
    assert_eq!(stream_id, stream.id());
    assert_eq!(chain_ids, vec!["chain1".to_string()]);
    assert!(stream.is_closed());

    drop(peer);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_reports_chain_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, mut scheduler_rx) = scheduler_channel(16);
    let manager = start_chain_rpc(rpc_config(dir.path()), scheduler).await.unwrap();

    let mut client = ChainClient::connect(&manager.connector()).unwrap();
    client.submit("T1", &key(), b"").await.unwrap();
    let SchedulerCommand::SubmitTx { stream, .. } = next_command(&mut scheduler_rx).await else {
        panic!("expected SubmitTx");
    };
    drop(client);

    let SchedulerCommand::ConnectionStopped { stream_id, chain_ids } =
        next_command(&mut scheduler_rx).await
    else {
        panic!("expected ConnectionStopped");
    };
    assert_eq!(stream_id, stream.id());
    assert_eq!(chain_ids, vec!["chain1".to_string()]);
    drop(stream);
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_responses_are_routed_to_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, mut scheduler_rx) = scheduler_channel(16);
    let manager = start_chain_rpc(rpc_config(dir.path()), scheduler).await.unwrap();

    let mut client = ChainClient::connect(&manager.connector()).unwrap();
    let bytecode = EngineMessage::new(MessageType::GetByteCodeResp, "chain1", "T1");
    client.send(&bytecode).await.unwrap();
    assert!(matches!(
        next_command(&mut scheduler_rx).await,
        SchedulerCommand::ByteCodeResponse(_)
    ));
    let state = EngineMessage::new(MessageType::GetStateResp, "chain1", "T1");
    client.send(&state).await.unwrap();
    assert!(matches!(
        next_command(&mut scheduler_rx).await,
        SchedulerCommand::StateResponse(_)
    ));
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_tcp_chain_stream() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, mut scheduler_rx) = scheduler_channel(16);
    let manager = start_chain_rpc(rpc_config(dir.path()), scheduler).await.unwrap();

    let socket = TcpStream::connect(manager.local_addr()).await.unwrap();
    let mut peer = Peer::new(socket);
    peer.send(&ChainClient::tx_request("T9", &key(), 1, b"")).await;
    let SchedulerCommand::SubmitTx { msg, stream } = next_command(&mut scheduler_rx).await else {
        panic!("expected SubmitTx");
    };
    assert_eq!(msg.tx_id, "T9");
    stream.try_send(msg.tx_response(TxStatus::Fail, "nope")).unwrap();
    let resp = peer.recv().await.unwrap();
    assert_eq!(resp.status(), TxStatus::Fail);
    drop(stream);
    manager.stop().await.unwrap();
}
