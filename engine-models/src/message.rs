// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::ModelsError;
use crate::keys::{ContractKey, UniqueTxKey};

/// Type tag of an [`EngineMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    /// Default enum value
    Unknown = 0,
    /// sandbox opens its stream with its process name
    Register = 1,
    /// manager accepted the sandbox stream
    RegisterAck = 2,
    /// execute a tx
    TxRequest = 3,
    /// tx outcome
    TxResponse = 4,
    /// read contract state
    GetStateReq = 5,
    /// contract state value
    GetStateResp = 6,
    /// cross-contract call from a running tx
    CallContractReq = 7,
    /// cross-contract call outcome
    CallContractResp = 8,
    /// bytecode lookup
    GetByteCodeReq = 9,
    /// bytecode bytes or path
    GetByteCodeResp = 10,
    /// open a key-value iterator
    CreateKvIteratorReq = 11,
    /// key-value iterator answer
    CreateKvIteratorResp = 12,
    /// load or reload bytecode in a sandbox
    ChangeSandboxReq = 13,
    /// bytecode load outcome
    ChangeSandboxResp = 14,
    /// tx finished, alternative to TxResponse
    Completion = 15,
    /// error report, closes the stream on protocol violations
    Error = 16,
}

impl MessageType {
    /// String value of the enum field names used in logs.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            MessageType::Unknown => "UNKNOWN",
            MessageType::Register => "REGISTER",
            MessageType::RegisterAck => "REGISTER_ACK",
            MessageType::TxRequest => "TX_REQUEST",
            MessageType::TxResponse => "TX_RESPONSE",
            MessageType::GetStateReq => "GET_STATE_REQ",
            MessageType::GetStateResp => "GET_STATE_RESP",
            MessageType::CallContractReq => "CALL_CONTRACT_REQ",
            MessageType::CallContractResp => "CALL_CONTRACT_RESP",
            MessageType::GetByteCodeReq => "GET_BYTE_CODE_REQ",
            MessageType::GetByteCodeResp => "GET_BYTE_CODE_RESP",
            MessageType::CreateKvIteratorReq => "CREATE_KV_ITERATOR_REQ",
            MessageType::CreateKvIteratorResp => "CREATE_KV_ITERATOR_RESP",
            MessageType::ChangeSandboxReq => "CHANGE_SANDBOX_REQ",
            MessageType::ChangeSandboxResp => "CHANGE_SANDBOX_RESP",
            MessageType::Completion => "COMPLETION",
            MessageType::Error => "ERROR",
        }
    }
}

/// Outcome code carried by responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TxStatus {
    /// success
    Ok = 0,
    /// contract-level failure, terminal
    Fail = 1,
    /// queues full or pool exhausted, retry later
    Busy = 2,
    /// tx deadline exceeded
    Timeout = 3,
    /// bytecode version mismatch detected by the sandbox
    BadContract = 4,
    /// sandbox died while running the tx
    SandboxExited = 5,
    /// cross-contract call nested too deep
    CallDepthExceeded = 6,
    /// malformed or out-of-sequence message
    ProtocolError = 7,
    /// retryable failure not covered by a more specific code
    Transient = 8,
}

impl TxStatus {
    /// String value of the enum field names used in logs and metrics labels.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            TxStatus::Ok => "OK",
            TxStatus::Fail => "FAIL",
            TxStatus::Busy => "BUSY",
            TxStatus::Timeout => "TIMEOUT",
            TxStatus::BadContract => "BAD_CONTRACT",
            TxStatus::SandboxExited => "SANDBOX_EXITED",
            TxStatus::CallDepthExceeded => "CALL_DEPTH_EXCEEDED",
            TxStatus::ProtocolError => "PROTOCOL_ERROR",
            TxStatus::Transient => "TRANSIENT",
        }
    }

    /// whether the chain may resubmit the tx
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxStatus::Busy | TxStatus::SandboxExited | TxStatus::Transient
        )
    }
}

/// Envelope of every message on both RPC surfaces.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EngineMessage {
    /// type tag
    #[prost(enumeration = "MessageType", tag = "1")]
    pub msg_type: i32,
    /// tx id, unique per chain
    #[prost(string, tag = "2")]
    pub tx_id: ::prost::alloc::string::String,
    /// chain id
    #[prost(string, tag = "3")]
    pub chain_id: ::prost::alloc::string::String,
    /// contract name
    #[prost(string, tag = "4")]
    pub contract_name: ::prost::alloc::string::String,
    /// contract version
    #[prost(string, tag = "5")]
    pub contract_version: ::prost::alloc::string::String,
    /// contract address
    #[prost(string, tag = "6")]
    pub contract_addr: ::prost::alloc::string::String,
    /// generation of the contract, incremented on upgrade
    #[prost(int64, tag = "7")]
    pub contract_index: i64,
    /// bytecode generation the sandbox is expected to run
    #[prost(int64, tag = "8")]
    pub file_version: i64,
    /// cross-contract nesting level, 1 for chain-originated txs
    #[prost(uint32, tag = "9")]
    pub call_depth: u32,
    /// outcome code of responses
    #[prost(enumeration = "TxStatus", tag = "10")]
    pub status: i32,
    /// human readable detail of the outcome
    #[prost(string, tag = "11")]
    pub message: ::prost::alloc::string::String,
    /// opaque payload
    #[prost(bytes = "vec", tag = "12")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    /// sandbox process name, for stream registration
    #[prost(string, tag = "13")]
    pub process_name: ::prost::alloc::string::String,
    /// tx timeout in milliseconds, 0 for the manager default
    #[prost(uint64, tag = "14")]
    pub timeout_ms: u64,
}

impl EngineMessage {
    /// Empty message of the given type for a tx.
    pub fn new(msg_type: MessageType, chain_id: &str, tx_id: &str) -> Self {
        let mut msg = EngineMessage {
            chain_id: chain_id.to_string(),
            tx_id: tx_id.to_string(),
            ..Default::default()
        };
        msg.set_msg_type(msg_type);
        msg
    }

    /// Sets the contract identity fields from a key.
    #[must_use]
    pub fn with_contract(mut self, key: &ContractKey) -> Self {
        self.chain_id = key.chain_id.clone();
        self.contract_name = key.contract_name.clone();
        self.contract_version = key.contract_version.clone();
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the status and detail.
    #[must_use]
    pub fn with_status(mut self, status: TxStatus, message: impl Into<String>) -> Self {
        self.set_status(status);
        self.message = message.into();
        self
    }

    /// Contract key targeted by this message.
    pub fn contract_key(&self) -> Result<ContractKey, ModelsError> {
        ContractKey::new(
            self.chain_id.as_str(),
            self.contract_name.as_str(),
            self.contract_version.as_str(),
        )
    }

    /// Key of the tx this message belongs to.
    pub fn unique_tx_key(&self) -> UniqueTxKey {
        UniqueTxKey::new(self.chain_id.as_str(), self.tx_id.as_str())
    }

    /// Response of type `msg_type` to this message, keeping its tx and contract identity
    /// and dropping its payload.
    pub fn response(&self, msg_type: MessageType, status: TxStatus, message: impl Into<String>) -> Self {
        let mut resp = EngineMessage {
            tx_id: self.tx_id.clone(),
            chain_id: self.chain_id.clone(),
            contract_name: self.contract_name.clone(),
            contract_version: self.contract_version.clone(),
            contract_addr: self.contract_addr.clone(),
            contract_index: self.contract_index,
            file_version: self.file_version,
            call_depth: self.call_depth,
            message: message.into(),
            ..Default::default()
        };
        resp.set_msg_type(msg_type);
        resp.set_status(status);
        resp
    }

    /// `TxResponse` to this request with the given outcome.
    pub fn tx_response(&self, status: TxStatus, message: impl Into<String>) -> Self {
        self.response(MessageType::TxResponse, status, message)
    }

    /// Copy without payload, kept by components that only need the identity of a tx.
    pub fn header(&self) -> Self {
        EngineMessage {
            payload: Vec::new(),
            ..self.clone()
        }
    }

    /// whether the message carries a successful outcome
    pub fn is_ok(&self) -> bool {
        self.status() == TxStatus::Ok
    }
}
