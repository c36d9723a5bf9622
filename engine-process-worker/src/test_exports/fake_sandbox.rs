// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::launcher::{LaunchRequest, SandboxChild, SandboxLauncher};
use async_trait::async_trait;
use engine_models::{ContractKey, EngineMessage, MessageType, ProcessName, TxStatus};
use engine_process_exports::ProcessError;
use engine_rpc_exports::{ReadBinder, RpcError, WriteBinder};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// What a fake sandbox does with a `TxRequest`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// answer at once
    Respond {
        status: TxStatus,
        payload: Vec<u8>,
    },
    /// call `callee` and answer with the outcome of the call
    CallContract {
        callee: ContractKey,
        payload: Vec<u8>,
    },
    /// read a state key through the chain and answer with its value
    GetState { key: Vec<u8> },
    /// exit without answering
    Crash,
    /// never answer
    Hang,
}

/// Decides the behaviour of the fake sandboxes, per tx.
pub type SandboxScript = Arc<dyn Fn(&EngineMessage) -> ScriptStep + Send + Sync>;

/// Hands the service end of a fake sandbox stream to the sandbox RPC service.
pub type SandboxConnector = Arc<dyn Fn(DuplexStream) + Send + Sync>;

/// Launches sandboxes as tasks talking over in-memory streams.
#[derive(Clone)]
pub struct FakeSandboxLauncher {
    connector: SandboxConnector,
    script: SandboxScript,
    launches: Arc<Mutex<Vec<LaunchRequest>>>,
    next_pid: Arc<AtomicU32>,
}

const FAKE_FRAME_LENGTH: usize = 1024 * 1024;

impl FakeSandboxLauncher {
    pub fn new(connector: SandboxConnector, script: SandboxScript) -> Self {
        FakeSandboxLauncher {
            connector,
            script,
            launches: Default::default(),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// Sandboxes answering every tx `Ok` with `payload`.
    pub fn answering(connector: SandboxConnector, payload: &[u8]) -> Self {
        let payload = payload.to_vec();
        Self::new(
            connector,
            Arc::new(move |_| ScriptStep::Respond {
                status: TxStatus::Ok,
                payload: payload.clone(),
            }),
        )
    }

    /// every launch so far
    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl SandboxLauncher for FakeSandboxLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SandboxChild>, ProcessError> {
        self.launches.lock().push(request.clone());
        let (client, server) = tokio::io::duplex(FAKE_FRAME_LENGTH);
        (self.connector)(server);
        let script = self.script.clone();
        let name = request.process_name;
        let task = tokio::spawn(async move {
            let _ = run_fake_sandbox(client, name, script).await;
        });
        Ok(Box::new(FakeChild {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            task: Some(task),
        }))
    }
}

struct FakeChild {
    pid: u32,
    /// `None` once the task finished
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl SandboxChild for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(task) = self.task.as_mut() {
            let res = task.await;
            self.task = None;
            if res.is_err() {
                return Ok(None);
            }
        }
        Ok(Some(0))
    }

    async fn kill(&mut self) -> io::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }
}

struct FakeSandbox {
    reader: ReadBinder<ReadHalf<DuplexStream>>,
    writer: WriteBinder<WriteHalf<DuplexStream>>,
}

impl FakeSandbox {
    async fn next(&mut self) -> Result<Option<EngineMessage>, RpcError> {
        Ok(self.reader.next().await?.map(|(_, msg)| msg))
    }

    /// Next message of type `msg_type`, skipping the others.
    async fn expect(&mut self, msg_type: MessageType) -> Result<Option<EngineMessage>, RpcError> {
        while let Some(msg) = self.next().await? {
            if msg.msg_type() == msg_type {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }
}

async fn run_fake_sandbox(
    stream: DuplexStream,
    name: ProcessName,
    script: SandboxScript,
) -> Result<(), RpcError> {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut sandbox = FakeSandbox {
        reader: ReadBinder::new(read_half, FAKE_FRAME_LENGTH),
        writer: WriteBinder::new(write_half, FAKE_FRAME_LENGTH),
    };
    let mut register = EngineMessage::new(MessageType::Register, "", "");
    register.process_name = name.to_string();
    sandbox.writer.send(&register).await?;

    while let Some(msg) = sandbox.next().await? {
        match msg.msg_type() {
            MessageType::ChangeSandboxReq => {
                let resp = if msg.payload.is_empty() {
                    msg.response(MessageType::ChangeSandboxResp, TxStatus::BadContract, "no bytecode path")
                } else {
                    msg.response(MessageType::ChangeSandboxResp, TxStatus::Ok, "")
                };
                sandbox.writer.send(&resp).await?;
            }
            MessageType::TxRequest => match script(&msg) {
                ScriptStep::Respond { status, payload } => {
                    sandbox
                        .writer
                        .send(&msg.tx_response(status, "").with_payload(payload))
                        .await?;
                }
                ScriptStep::CallContract { callee, payload } => {
                    let call = EngineMessage::new(MessageType::CallContractReq, &msg.chain_id, &msg.tx_id)
                        .with_contract(&callee)
                        .with_payload(payload);
                    sandbox.writer.send(&call).await?;
                    let Some(outcome) = sandbox.expect(MessageType::CallContractResp).await? else {
                        return Ok(());
                    };
                    let resp = msg
                        .tx_response(outcome.status(), outcome.message)
                        .with_payload(outcome.payload);
                    sandbox.writer.send(&resp).await?;
                }
                ScriptStep::GetState { key } => {
                    let req = EngineMessage::new(MessageType::GetStateReq, &msg.chain_id, &msg.tx_id)
                        .with_payload(key);
                    sandbox.writer.send(&req).await?;
                    let Some(value) = sandbox.expect(MessageType::GetStateResp).await? else {
                        return Ok(());
                    };
                    let resp = msg
                        .tx_response(value.status(), value.message)
                        .with_payload(value.payload);
                    sandbox.writer.send(&resp).await?;
                }
                ScriptStep::Crash => return Ok(()),
                ScriptStep::Hang => {}
            },
            _ => {}
        }
    }
    Ok(())
}
