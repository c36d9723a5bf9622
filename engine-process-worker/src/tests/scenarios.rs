// Copyright (c) 2022 MASSA LABS <info@massa.net>

use super::tools::{
    answering, artifact, counter_key, ledger_key, lane, process_config, queued, PoolHarness,
    UID_BASE,
};
use crate::launcher::MockSandboxLauncher;
use crate::test_exports::{SandboxScript, ScriptStep};
use engine_models::{ContractArtifact, EngineMessage, MessageType, TxStatus};
use engine_process_exports::{EngineEvent, ProcessConfig, ProcessError, ProcessState};
use engine_scheduler_exports::SchedulerCommand;
use engine_time::EngineTime;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_process_runs_queued_tx() {
    let mut h = PoolHarness::start(process_config, answering()).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(&lane, &art, vec![queued("T1", &art, true)]);

    let resp = h.completed().await;
    assert_eq!(resp.tx_id, "T1");
    assert_eq!(resp.msg_type(), MessageType::TxResponse);
    assert_eq!(resp.status(), TxStatus::Ok);
    assert_eq!(resp.payload, b"done".to_vec());
    assert_eq!(h.launched_uids(), vec![UID_BASE]);

    let census = h
        .census_until(|c| c.count_in_state(ProcessState::Ready) == 1)
        .await;
    assert_eq!(census.live_orig, 1);
    assert_eq!(census.count_for_key(&counter_key()), 1);
    assert_eq!(h.runtime.registered_notifiers(), 0);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_answered_tx_is_not_run() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let script: SandboxScript = Arc::new(move |msg: &EngineMessage| {
        recorder.lock().push(msg.tx_id.clone());
        ScriptStep::Respond {
            status: TxStatus::Ok,
            payload: b"done".to_vec(),
        }
    });
    let mut h = PoolHarness::start(process_config, script).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    let answered = queued("T1", &art, true);
    answered.cancel.cancel();
    h.demand(&lane, &art, vec![answered, queued("T2", &art, true)]);

    let resp = h.completed().await;
    assert_eq!(resp.tx_id, "T2");
    assert_eq!(resp.status(), TxStatus::Ok);
    assert_eq!(*seen.lock(), vec!["T2".to_string()]);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_origin_pool_is_bounded() {
    let mut h = PoolHarness::start(process_config, answering()).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    let txs = ["T1", "T2", "T3"].iter().map(|id| queued(id, &art, true)).collect();
    h.demand(&lane, &art, txs);

    let mut done: Vec<String> = Vec::new();
    for _ in 0..3 {
        let resp = h.completed().await;
        assert_eq!(resp.status(), TxStatus::Ok);
        assert!(h.census.live(true) <= 1);
        done.push(resp.tx_id);
    }
    // a single process drains the lane in order
    assert_eq!(done, vec!["T1", "T2", "T3"]);
    assert_eq!(h.launched_uids().len(), 1);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_cross_pool_is_bounded_by_call_depth() {
    let mut h = PoolHarness::start(process_config, answering()).await;
    let art = artifact(&ledger_key(), 1, h.dir.path());
    let lane = lane(&art, false);
    let txs = ["T1#1", "T2#1", "T3#1"]
        .iter()
        .map(|id| queued(id, &art, false))
        .collect();
    h.demand(&lane, &art, txs);

    for _ in 0..3 {
        assert_eq!(h.completed().await.status(), TxStatus::Ok);
    }
    assert_eq!(h.launched_uids().len(), 2);
    let census = h.census.snapshot();
    assert_eq!(census.live_cross, 2);
    assert_eq!(census.live_orig, 0);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_ready_process_changes_contract_when_pool_is_full() {
    let mut h = PoolHarness::start(process_config, answering()).await;
    let counter = artifact(&counter_key(), 1, h.dir.path());
    let counter_lane = lane(&counter, true);
    h.demand(&counter_lane, &counter, vec![queued("T1", &counter, true)]);
    assert_eq!(h.completed().await.tx_id, "T1");
    h.census_until(|c| c.count_in_state(ProcessState::Ready) == 1)
        .await;

    let ledger = artifact(&ledger_key(), 1, h.dir.path());
    let ledger_lane = lane(&ledger, true);
    h.demand(&ledger_lane, &ledger, vec![queued("T2", &ledger, true)]);
    let resp = h.completed().await;
    assert_eq!(resp.tx_id, "T2");
    assert_eq!(resp.contract_name, "ledger");

    // same process, same user
    assert_eq!(h.launched_uids(), vec![UID_BASE]);
    let census = h
        .census_until(|c| c.count_for_key(&ledger_key()) == 1)
        .await;
    assert_eq!(census.count_for_key(&counter_key()), 0);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_tx_budget_recycles_process() {
    let cfg = |dir: &std::path::Path| ProcessConfig {
        max_tx_per_process: 1,
        ..process_config(dir)
    };
    let mut h = PoolHarness::start(cfg, answering()).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(
        &lane,
        &art,
        vec![queued("T1", &art, true), queued("T2", &art, true)],
    );

    assert_eq!(h.completed().await.tx_id, "T1");
    assert_eq!(h.completed().await.tx_id, "T2");
    // the replacement got the next user of the pool
    assert_eq!(h.launched_uids(), vec![UID_BASE, UID_BASE + 1]);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_crashed_sandbox_fails_its_tx_and_is_replaced() {
    let script = Arc::new(|msg: &engine_models::EngineMessage| {
        if msg.tx_id == "T1" {
            ScriptStep::Crash
        } else {
            ScriptStep::Respond {
                status: TxStatus::Ok,
                payload: Vec::new(),
            }
        }
    });
    let mut h = PoolHarness::start(process_config, script).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(
        &lane,
        &art,
        vec![queued("T1", &art, true), queued("T2", &art, true)],
    );

    let crashed = h.completed().await;
    assert_eq!(crashed.tx_id, "T1");
    assert_eq!(crashed.status(), TxStatus::SandboxExited);
    let next = h.completed().await;
    assert_eq!(next.tx_id, "T2");
    assert_eq!(next.status(), TxStatus::Ok);
    assert_eq!(h.launched_uids().len(), 2);
    h.census_until(|c| c.total() == 1).await;
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_idle_processes_are_released() {
    let cfg = |dir: &std::path::Path| ProcessConfig {
        idle_release_timeout: EngineTime::from_millis(50),
        ..process_config(dir)
    };
    let mut h = PoolHarness::start(cfg, answering()).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(&lane, &art, vec![queued("T1", &art, true)]);
    assert_eq!(h.completed().await.status(), TxStatus::Ok);

    h.census_until(|c| c.total() == 0).await;
    assert_eq!(h.runtime.pending_binds(), 0);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_failed_launch_leaks_nothing() {
    let mut launcher = MockSandboxLauncher::new();
    launcher
        .expect_launch()
        .times(1)
        .returning(|_| Err(ProcessError::LaunchError("no sandbox binary".into())));
    let h = PoolHarness::start_with(process_config, move |_| Arc::new(launcher)).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(&lane, &art, vec![queued("T1", &art, true)]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.census_until(|c| c.total() == 0).await;
    assert_eq!(h.runtime.pending_binds(), 0);
    // the tx stays queued for the next demand signal
    assert_eq!(lane.depth(), 1);
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_connection_stop_closes_ready_processes() {
    let mut h = PoolHarness::start(process_config, answering()).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(&lane, &art, vec![queued("T1", &art, true)]);
    assert_eq!(h.completed().await.status(), TxStatus::Ok);
    h.census_until(|c| c.count_in_state(ProcessState::Ready) == 1)
        .await;

    h.pm.notify_event(EngineEvent::ConnectionStopped {
        chain_ids: vec!["chain1".to_string()],
    })
    .unwrap();
    h.census_until(|c| c.total() == 0).await;
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_cross_call_goes_through_scheduler() {
    let script = Arc::new(|_: &engine_models::EngineMessage| ScriptStep::CallContract {
        callee: ledger_key(),
        payload: b"inner-args".to_vec(),
    });
    let mut h = PoolHarness::start(process_config, script).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(&lane, &art, vec![queued("T1", &art, true)]);

    let SchedulerCommand::CrossCall {
        request,
        parent,
        reply_tx,
    } = h.scheduler_cmd().await
    else {
        panic!("expected a cross call");
    };
    assert_eq!(request.msg_type(), MessageType::CallContractReq);
    assert_eq!(request.contract_name, "ledger");
    assert_eq!(request.payload, b"inner-args".to_vec());
    assert_eq!(parent.key.tx_id, "T1");
    assert_eq!(parent.call_depth, 1);
    reply_tx
        .send(request.tx_response(TxStatus::Ok, "").with_payload(b"inner".to_vec()))
        .unwrap();

    let resp = h.completed().await;
    assert_eq!(resp.tx_id, "T1");
    assert_eq!(resp.status(), TxStatus::Ok);
    assert_eq!(resp.payload, b"inner".to_vec());
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_state_request_is_answered_through_scheduler() {
    let script = Arc::new(|_: &engine_models::EngineMessage| ScriptStep::GetState {
        key: b"balance".to_vec(),
    });
    let mut h = PoolHarness::start(process_config, script).await;
    let art = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&art, true);
    h.demand(&lane, &art, vec![queued("T1", &art, true)]);

    let SchedulerCommand::StateRequest {
        request,
        root,
        reply_tx,
    } = h.scheduler_cmd().await
    else {
        panic!("expected a state request");
    };
    assert_eq!(request.payload, b"balance".to_vec());
    assert_eq!(root.tx_id, "T1");
    reply_tx
        .send(
            request
                .response(MessageType::GetStateResp, TxStatus::Ok, "")
                .with_payload(b"42".to_vec()),
        )
        .await
        .unwrap();

    let resp = h.completed().await;
    assert_eq!(resp.payload, b"42".to_vec());
    h.stop().await;
}

#[tokio::test]
#[serial]
async fn test_refused_bytecode_hands_tx_back() {
    let mut h = PoolHarness::start(process_config, answering()).await;
    let v1 = artifact(&counter_key(), 1, h.dir.path());
    let lane = lane(&v1, true);
    // newer generation whose bytes the sandbox cannot load
    let broken = ContractArtifact {
        key: counter_key(),
        path: PathBuf::new(),
        file_version: 2,
    };
    h.demand(&lane, &v1, vec![queued("T1", &broken, true)]);

    let SchedulerCommand::BadContract { tx, .. } = h.scheduler_cmd().await else {
        panic!("expected the tx back");
    };
    assert_eq!(tx.msg.tx_id, "T1");
    assert_eq!(tx.artifact.file_version, 2);
    h.census_until(|c| c.total() == 0).await;
    h.stop().await;
}
