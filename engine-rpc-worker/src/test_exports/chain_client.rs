// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::ChainStreamConnector;
use engine_models::{ContractKey, EngineMessage, MessageType, TxStatus};
use engine_rpc_exports::{ReadBinder, RpcError, WriteBinder};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

const CLIENT_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// Chain side of a stream. Answers bytecode and state requests from its own
/// tables while waiting for tx responses.
pub struct ChainClient {
    reader: ReadBinder<ReadHalf<DuplexStream>>,
    writer: WriteBinder<WriteHalf<DuplexStream>>,
    /// bytecode served per contract, with its contract index
    pub contracts: HashMap<ContractKey, (i64, Vec<u8>)>,
    /// state served by key
    pub state: HashMap<Vec<u8>, Vec<u8>>,
    /// every `GetByteCodeReq` received
    pub bytecode_requests: Vec<EngineMessage>,
    /// every state request received
    pub state_requests: Vec<EngineMessage>,
}

impl ChainClient {
    /// Opens a stream on the chain service behind `connector`.
    pub fn connect(connector: &ChainStreamConnector) -> Result<Self, RpcError> {
        let (client, server) = tokio::io::duplex(CLIENT_FRAME_LENGTH);
        connector.attach(server)?;
        let (read_half, write_half) = tokio::io::split(client);
        Ok(ChainClient {
            reader: ReadBinder::new(read_half, CLIENT_FRAME_LENGTH),
            writer: WriteBinder::new(write_half, CLIENT_FRAME_LENGTH),
            contracts: HashMap::new(),
            state: HashMap::new(),
            bytecode_requests: Vec::new(),
            state_requests: Vec::new(),
        })
    }

    /// Serves `code` for `key` at `contract_index`.
    pub fn with_contract(mut self, key: &ContractKey, contract_index: i64, code: &[u8]) -> Self {
        self.contracts
            .insert(key.clone(), (contract_index, code.to_vec()));
        self
    }

    /// `TxRequest` for `key` observed at `contract_index`.
    pub fn tx_request(tx_id: &str, key: &ContractKey, contract_index: i64, payload: &[u8]) -> EngineMessage {
        let mut msg = EngineMessage::new(MessageType::TxRequest, &key.chain_id, tx_id)
            .with_contract(key)
            .with_payload(payload.to_vec());
        msg.contract_index = contract_index;
        msg
    }

    /// Writes a raw message.
    pub async fn send(&mut self, msg: &EngineMessage) -> Result<(), RpcError> {
        self.writer.send(msg).await.map(|_| ())
    }

    /// Submits a tx for `key` at its current contract index.
    pub async fn submit(&mut self, tx_id: &str, key: &ContractKey, payload: &[u8]) -> Result<(), RpcError> {
        let contract_index = self.contracts.get(key).map(|(i, _)| *i).unwrap_or(1);
        let msg = Self::tx_request(tx_id, key, contract_index, payload);
        self.send(&msg).await
    }

    /// Next message from the engine, `None` if the stream closed or `wait` elapsed.
    pub async fn recv(&mut self, wait: Duration) -> Option<EngineMessage> {
        match tokio::time::timeout(wait, self.reader.next()).await {
            Ok(Ok(Some((_, msg)))) => Some(msg),
            _ => None,
        }
    }

    /// Next message that is neither a bytecode nor a state request, answering those on the way.
    pub async fn next_response(&mut self, wait: Duration) -> Option<EngineMessage> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = self.recv(left).await?;
            match msg.msg_type() {
                MessageType::GetByteCodeReq => {
                    let resp = self.answer_bytecode(&msg);
                    self.bytecode_requests.push(msg);
                    self.send(&resp).await.ok()?;
                }
                MessageType::GetStateReq | MessageType::CreateKvIteratorReq => {
                    let resp = self.answer_state(&msg);
                    self.state_requests.push(msg);
                    self.send(&resp).await.ok()?;
                }
                _ => return Some(msg),
            }
        }
    }

    /// Collects `count` responses keyed by tx id.
    pub async fn responses(&mut self, count: usize, wait: Duration) -> HashMap<String, EngineMessage> {
        let mut res = HashMap::new();
        while res.len() < count {
            match self.next_response(wait).await {
                Some(msg) => {
                    res.insert(msg.tx_id.clone(), msg);
                }
                None => break,
            }
        }
        res
    }

    fn answer_bytecode(&self, req: &EngineMessage) -> EngineMessage {
        let found = req
            .contract_key()
            .ok()
            .and_then(|key| self.contracts.get(&key));
        match found {
            Some((contract_index, code)) => {
                let mut resp = req
                    .response(MessageType::GetByteCodeResp, TxStatus::Ok, "")
                    .with_payload(code.clone());
                resp.contract_index = *contract_index;
                resp
            }
            None => req.response(MessageType::GetByteCodeResp, TxStatus::Fail, "unknown contract"),
        }
    }

    fn answer_state(&self, req: &EngineMessage) -> EngineMessage {
        let resp_type = if req.msg_type() == MessageType::CreateKvIteratorReq {
            MessageType::CreateKvIteratorResp
        } else {
            MessageType::GetStateResp
        };
        match self.state.get(&req.payload) {
            Some(value) => req.response(resp_type, TxStatus::Ok, "").with_payload(value.clone()),
            None => req.response(resp_type, TxStatus::Fail, "no such key"),
        }
    }
}
