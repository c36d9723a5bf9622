// Copyright (c) 2023 MASSA LABS <info@massa.net>

use super::tools::*;
use crate::{start_contract_cache, ContractCacheError};
use engine_models::{MessageType, TxStatus};
use serial_test::serial;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

#[tokio::test]
#[serial]
async fn test_concurrent_gets_share_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, manager) = start_contract_cache(cache_config(dir.path())).unwrap();
    let (stream, mut chain_rx) = mock_chain_stream();

    let mut handles = Vec::new();
    for i in 0..10 {
        let cache = cache.clone();
        let origin = origin(&stream, &format!("T{}", i));
        handles.push(tokio::spawn(async move {
            cache.get_contract(counter_key("v2"), 1, origin).await
        }));
    }

    let req = expect_bytecode_request(&mut chain_rx).await;
    assert_eq!(req.contract_name, "counter");
    assert_eq!(req.contract_version, "v2");
    cache
        .on_bytecode_response(bytecode_response(&req, 1, b"wasm-v2"))
        .await
        .unwrap();

    for handle in handles {
        let artifact = handle.await.unwrap().unwrap();
        assert_eq!(artifact.file_version, 1);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"wasm-v2");
    }
    assert!(matches!(chain_rx.try_recv(), Err(TryRecvError::Empty)));

    // served from cache afterwards
    let artifact = cache
        .get_contract(counter_key("v2"), 1, origin(&stream, "T11"))
        .await
        .unwrap();
    assert_eq!(artifact.file_version, 1);
    assert!(matches!(chain_rx.try_recv(), Err(TryRecvError::Empty)));
    manager.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_file_version_never_decreases() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, manager) = start_contract_cache(cache_config(dir.path())).unwrap();
    let (stream, mut chain_rx) = mock_chain_stream();
    let key = counter_key("v1");

    let fetch = {
        let cache = cache.clone();
        let origin = origin(&stream, "T1");
        let key = key.clone();
        tokio::spawn(async move { cache.get_contract(key, 2, origin).await })
    };
    let req = expect_bytecode_request(&mut chain_rx).await;
    assert_eq!(req.contract_index, 2);
    cache
        .on_bytecode_response(bytecode_response(&req, 2, b"code-2"))
        .await
        .unwrap();
    assert_eq!(fetch.await.unwrap().unwrap().file_version, 2);

    // an older observation does not invalidate
    assert!(!cache.invalidate_if_stale(key.clone(), 1).await.unwrap());
    assert!(!cache.invalidate_if_stale(key.clone(), 2).await.unwrap());
    assert!(cache.invalidate_if_stale(key.clone(), 3).await.unwrap());

    // refetch; the chain answers with an older index but the version stays at the demand
    let fetch = {
        let cache = cache.clone();
        let origin = origin(&stream, "T2");
        let key = key.clone();
        tokio::spawn(async move { cache.get_contract(key, 3, origin).await })
    };
    let req = expect_bytecode_request(&mut chain_rx).await;
    cache
        .on_bytecode_response(bytecode_response(&req, 1, b"code-3"))
        .await
        .unwrap();
    let artifact = fetch.await.unwrap().unwrap();
    assert_eq!(artifact.file_version, 3);
    assert_eq!(cache.cached_version(key.clone()).await.unwrap(), Some(3));
    // the previous file is pruned once the new one is published
    assert!(!artifact.path.with_file_name("counter#v1#2").exists());
    manager.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_failed_fetch_is_retried_on_next_get() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, manager) = start_contract_cache(cache_config(dir.path())).unwrap();
    let (stream, mut chain_rx) = mock_chain_stream();

    let fetch = {
        let cache = cache.clone();
        let origin = origin(&stream, "T1");
        tokio::spawn(async move { cache.get_contract(counter_key("v1"), 1, origin).await })
    };
    let req = expect_bytecode_request(&mut chain_rx).await;
    let refusal = req.response(MessageType::GetByteCodeResp, TxStatus::Fail, "unknown contract");
    cache.on_bytecode_response(refusal).await.unwrap();
    assert_eq!(
        fetch.await.unwrap(),
        Err(ContractCacheError::FetchFailed("unknown contract".into()))
    );

    let fetch = {
        let cache = cache.clone();
        let origin = origin(&stream, "T2");
        tokio::spawn(async move { cache.get_contract(counter_key("v1"), 1, origin).await })
    };
    let req = expect_bytecode_request(&mut chain_rx).await;
    assert_eq!(req.tx_id, "T2");
    cache
        .on_bytecode_response(bytecode_response(&req, 1, b"code"))
        .await
        .unwrap();
    assert!(fetch.await.unwrap().is_ok());
    manager.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_unanswered_fetch_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = cache_config(dir.path());
    cfg.fetch_timeout = engine_time::EngineTime::from_millis(50);
    let (cache, manager) = start_contract_cache(cfg).unwrap();
    let (stream, mut chain_rx) = mock_chain_stream();

    let res = tokio::time::timeout(
        Duration::from_secs(2),
        cache.get_contract(counter_key("v1"), 1, origin(&stream, "T1")),
    )
    .await
    .unwrap();
    assert!(matches!(res, Err(ContractCacheError::FetchTimeout(_))));
    let req = expect_bytecode_request(&mut chain_rx).await;

    // a late answer is dropped
    cache
        .on_bytecode_response(bytecode_response(&req, 1, b"late"))
        .await
        .unwrap();
    assert_eq!(cache.cached_version(counter_key("v1")).await.unwrap(), None);
    manager.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_closed_chain_stream_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, manager) = start_contract_cache(cache_config(dir.path())).unwrap();
    let (stream, chain_rx) = mock_chain_stream();
    drop(chain_rx);
    let res = cache
        .get_contract(counter_key("v1"), 1, origin(&stream, "T1"))
        .await;
    assert!(matches!(res, Err(ContractCacheError::StreamError(_))));
    manager.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_restart_adopts_cached_files() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (cache, manager) = start_contract_cache(cache_config(dir.path())).unwrap();
        let (stream, mut chain_rx) = mock_chain_stream();
        let fetch = {
            let cache = cache.clone();
            let origin = origin(&stream, "T1");
            tokio::spawn(async move { cache.get_contract(counter_key("v1"), 4, origin).await })
        };
        let req = expect_bytecode_request(&mut chain_rx).await;
        cache
            .on_bytecode_response(bytecode_response(&req, 4, b"code"))
            .await
            .unwrap();
        fetch.await.unwrap().unwrap();
        manager.stop().await.unwrap();
    }
    let (cache, manager) = start_contract_cache(cache_config(dir.path())).unwrap();
    assert_eq!(cache.cached_version(counter_key("v1")).await.unwrap(), Some(4));
    let (stream, mut chain_rx) = mock_chain_stream();
    let artifact = cache
        .get_contract(counter_key("v1"), 4, origin(&stream, "T2"))
        .await
        .unwrap();
    assert_eq!(std::fs::read(artifact.path).unwrap(), b"code");
    assert!(matches!(chain_rx.try_recv(), Err(TryRecvError::Empty)));
    manager.stop().await.unwrap();
}
