// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::writer::{flush_writer, write_loop};
use engine_logging::engine_trace;
use engine_models::{EngineMessage, MessageType, TxStatus};
use engine_rpc_exports::{
    PendingBind, ReadBinder, RpcConfig, RpcError, SandboxLink, SandboxRuntime, WriteBinder,
};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Hands in-memory sandbox streams to a running sandbox service.
#[derive(Clone)]
pub struct SandboxStreamConnector(mpsc::Sender<DuplexStream>);

impl SandboxStreamConnector {
    /// Serves `stream` as if a sandbox had connected to the socket.
    /// A full or stopped service drops the stream, which the sandbox sees as a closed connection.
    pub fn attach(&self, stream: DuplexStream) {
        if self.0.try_send(stream).is_err() {
            warn!("could not attach sandbox stream: service unavailable");
        }
    }
}

/// Handle of the sandbox service.
pub struct SandboxRpcManager {
    join_handle: JoinHandle<Result<(), RpcError>>,
    manager_tx: mpsc::Sender<()>,
    socket_path: PathBuf,
    connector: SandboxStreamConnector,
}

impl SandboxRpcManager {
    /// path of the listening socket
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// connector for in-memory streams
    pub fn connector(&self) -> SandboxStreamConnector {
        self.connector.clone()
    }

    /// Stops accepting, closes every sandbox stream and removes the socket.
    pub async fn stop(self) -> Result<(), RpcError> {
        info!("stopping sandbox rpc...");
        drop(self.manager_tx);
        self.join_handle.await??;
        if let Err(err) = tokio::fs::remove_file(&self.socket_path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "could not remove sandbox socket {}: {}",
                    self.socket_path.display(),
                    err
                );
            }
        }
        info!("sandbox rpc stopped");
        Ok(())
    }
}

/// Binds the sandbox socket, replacing a stale one, and starts accepting streams.
pub async fn start_sandbox_rpc(
    cfg: RpcConfig,
    runtime: SandboxRuntime,
) -> Result<SandboxRpcManager, RpcError> {
    let socket_path = cfg.sandbox_socket_path();
    tokio::fs::create_dir_all(&cfg.sandbox_rpc_dir).await?;
    match tokio::fs::remove_file(&socket_path).await {
        Ok(()) => debug!("removed stale sandbox socket {}", socket_path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!("sandbox rpc listening on {}", socket_path.display());

    let (attach_tx, attach_rx) = mpsc::channel(cfg.stream_channel_size);
    let (manager_tx, manager_rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = SandboxRpcWorker {
        cfg,
        runtime,
        listener,
        attach_rx,
        manager_rx,
        stop_tx,
        stop_rx,
    };
    let join_handle = tokio::spawn(worker.run_loop());
    Ok(SandboxRpcManager {
        join_handle,
        manager_tx,
        socket_path,
        connector: SandboxStreamConnector(attach_tx),
    })
}

struct SandboxRpcWorker {
    cfg: RpcConfig,
    runtime: SandboxRuntime,
    listener: UnixListener,
    attach_rx: mpsc::Receiver<DuplexStream>,
    manager_rx: mpsc::Receiver<()>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl SandboxRpcWorker {
    async fn run_loop(mut self) -> Result<(), RpcError> {
        let mut streams = FuturesUnordered::new();
        loop {
            tokio::select! {
                biased;
                _ = self.manager_rx.recv() => break,
                Some(res) = streams.next(), if !streams.is_empty() => {
                    if let Err(err) = res {
                        warn!("sandbox stream task crashed: {}", err);
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, _)) => streams.push(self.spawn_stream(socket)),
                    Err(err) => warn!("sandbox rpc accept failed: {}", err),
                },
                Some(stream) = self.attach_rx.recv() => streams.push(self.spawn_stream(stream)),
            }
        }

        let _ = self.stop_tx.send(true);
        while let Some(res) = streams.next().await {
            if let Err(err) = res {
                warn!("sandbox stream task crashed: {}", err);
            }
        }
        Ok(())
    }

    fn spawn_stream<S>(&self, stream: S) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(serve_sandbox_stream(
            stream,
            self.cfg.clone(),
            self.runtime.clone(),
            self.stop_rx.clone(),
        ))
    }
}

async fn serve_sandbox_stream<S>(
    stream: S,
    cfg: RpcConfig,
    runtime: SandboxRuntime,
    mut stop_rx: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = ReadBinder::new(read_half, cfg.max_recv_bytes());
    let mut writer = WriteBinder::new(write_half, cfg.max_send_bytes());

    let register = match timeout(cfg.register_timeout.to_duration(), reader.next()).await {
        Ok(Ok(Some((_, msg)))) => msg,
        Ok(Ok(None)) => {
            debug!("sandbox stream closed before registering");
            return;
        }
        Ok(Err(err)) => {
            debug!("sandbox stream failed before registering: {}", err);
            return;
        }
        Err(_) => {
            warn!("sandbox did not register within {}", cfg.register_timeout);
            return;
        }
    };
    let (process_name, bind) = match bind_sandbox(&register, &runtime) {
        Ok(bound) => bound,
        Err(err) => {
            warn!("refusing sandbox stream: {}", err);
            let refusal = register.response(MessageType::Error, TxStatus::ProtocolError, err.to_string());
            let _ = timeout(cfg.write_timeout.to_duration(), writer.send(&refusal)).await;
            return;
        }
    };

    let mut ack = register.response(MessageType::RegisterAck, TxStatus::Ok, "");
    ack.process_name = process_name.clone();
    match timeout(cfg.write_timeout.to_duration(), writer.send(&ack)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            warn!("could not acknowledge sandbox {}: {}", process_name, err);
            return;
        }
        Err(_) => {
            warn!("could not acknowledge sandbox {} in time", process_name);
            return;
        }
    }

    let (out_tx, out_rx) = mpsc::channel(cfg.stream_channel_size);
    let writer_task = tokio::spawn(write_loop(writer, out_rx, cfg.write_timeout));
    let (closed_tx, closed) = oneshot::channel();
    let PendingBind { inbound, link_tx } = bind;
    if link_tx
        .send(SandboxLink {
            writer: out_tx,
            closed,
        })
        .is_err()
    {
        debug!("process {} went away while its sandbox registered", process_name);
        writer_task.abort();
        return;
    }
    info!("sandbox {} bound", process_name);

    let mut violations = 0usize;
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => break Some("engine stopping".to_string()),
            next = reader.next() => next,
        };
        let msg = match next {
            Ok(Some((_, msg))) => msg,
            Ok(None) => break Some("sandbox closed its stream".to_string()),
            Err(err) => break Some(err.to_string()),
        };
        engine_trace!("sandbox_rpc.stream.recv", {
            "process": process_name,
            "msg_type": msg.msg_type().as_str_name(),
            "tx_id": msg.tx_id
        });
        match msg.msg_type() {
            MessageType::ChangeSandboxResp => {
                if inbound.send(msg).await.is_err() {
                    break None;
                }
            }
            MessageType::TxResponse
            | MessageType::Completion
            | MessageType::Error
            | MessageType::GetStateReq
            | MessageType::GetByteCodeReq
            | MessageType::CallContractReq
            | MessageType::CreateKvIteratorReq => {
                if msg.tx_id.is_empty() {
                    if inbound.send(msg).await.is_err() {
                        break None;
                    }
                    continue;
                }
                match runtime.sandbox_msg_notifier(&msg.unique_tx_key()) {
                    Some(notifier) => {
                        let _ = notifier.send(msg).await;
                    }
                    None => debug!(
                        "dropping {} of sandbox {} for tx {}: nobody waits for it",
                        msg.msg_type().as_str_name(),
                        process_name,
                        msg.tx_id
                    ),
                }
            }
            other => {
                violations += 1;
                warn!(
                    "sandbox {} sent unexpected {} ({}/{})",
                    process_name,
                    other.as_str_name(),
                    violations,
                    cfg.max_protocol_violations
                );
                if violations >= cfg.max_protocol_violations {
                    break Some(format!(
                        "{} protocol violations, last was {}",
                        violations,
                        other.as_str_name()
                    ));
                }
            }
        }
    };
    match &reason {
        Some(reason) => info!("sandbox {} stream closed: {}", process_name, reason),
        None => debug!("sandbox {} stream closed", process_name),
    }
    let _ = closed_tx.send(reason);
    flush_writer(writer_task, cfg.flush_timeout, &process_name).await;
}

fn bind_sandbox(
    register: &EngineMessage,
    runtime: &SandboxRuntime,
) -> Result<(String, PendingBind), RpcError> {
    if register.msg_type() != MessageType::Register {
        return Err(RpcError::ProtocolError(format!(
            "expected REGISTER, got {}",
            register.msg_type().as_str_name()
        )));
    }
    let process_name = register.process_name.clone();
    match runtime.take_bind(&process_name) {
        Some(bind) => Ok((process_name, bind)),
        None => Err(RpcError::UnknownProcess(process_name)),
    }
}
