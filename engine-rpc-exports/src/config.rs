// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_models::constants::MEGABYTE;
use engine_time::EngineTime;
use std::net::SocketAddr;
use std::path::PathBuf;

/// RPC configuration, shared by the chain and sandbox services
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// where the chain stream listener binds
    pub chain_rpc_bind: SocketAddr,
    /// directory holding the sandbox socket
    pub sandbox_rpc_dir: PathBuf,
    /// file name of the sandbox socket inside `sandbox_rpc_dir`
    pub sandbox_socket_name: String,
    /// largest frame we send, in MB
    pub max_send_msg_size: usize,
    /// largest frame we accept, in MB
    pub max_recv_msg_size: usize,
    /// timeout of a single frame write
    pub write_timeout: EngineTime,
    /// time a sandbox has to send `Register` once connected
    pub register_timeout: EngineTime,
    /// time given to the writer of a closing stream to flush
    pub flush_timeout: EngineTime,
    /// size of the per-stream outbound channel
    pub stream_channel_size: usize,
    /// protocol violations tolerated on a sandbox stream before it is closed
    pub max_protocol_violations: usize,
}

impl RpcConfig {
    /// largest frame we send, in bytes
    pub fn max_send_bytes(&self) -> usize {
        self.max_send_msg_size.saturating_mul(MEGABYTE)
    }

    /// largest frame we accept, in bytes
    pub fn max_recv_bytes(&self) -> usize {
        self.max_recv_msg_size.saturating_mul(MEGABYTE)
    }

    /// full path of the sandbox socket
    pub fn sandbox_socket_path(&self) -> PathBuf {
        self.sandbox_rpc_dir.join(&self.sandbox_socket_name)
    }
}
