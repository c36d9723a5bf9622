// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::writer::{flush_writer, write_loop};
use engine_logging::engine_trace;
use engine_models::{EngineMessage, MessageType, TxStatus};
use engine_rpc_exports::{ChainStream, ChainStreamId, ReadBinder, RpcConfig, RpcError, WriteBinder};
use engine_scheduler_exports::SchedulerCommandSender;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hands in-memory chain streams to a running chain service.
#[derive(Clone)]
pub struct ChainStreamConnector(mpsc::Sender<DuplexStream>);

impl ChainStreamConnector {
    /// Serves `stream` as if a chain had connected over TCP.
    pub fn attach(&self, stream: DuplexStream) -> Result<(), RpcError> {
        self.0
            .try_send(stream)
            .map_err(|_| RpcError::ChannelError("could not attach chain stream".into()))
    }
}

/// Handle of the chain service.
pub struct ChainRpcManager {
    join_handle: JoinHandle<Result<(), RpcError>>,
    manager_tx: mpsc::Sender<()>,
    local_addr: SocketAddr,
    connector: ChainStreamConnector,
}

impl ChainRpcManager {
    /// address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// connector for in-memory streams
    pub fn connector(&self) -> ChainStreamConnector {
        self.connector.clone()
    }

    /// Stops accepting, closes every chain stream and waits for them to wind down.
    pub async fn stop(self) -> Result<(), RpcError> {
        info!("stopping chain rpc...");
        drop(self.manager_tx);
        self.join_handle.await??;
        info!("chain rpc stopped");
        Ok(())
    }
}

/// Binds the chain listener and starts accepting streams.
pub async fn start_chain_rpc(
    cfg: RpcConfig,
    scheduler: SchedulerCommandSender,
) -> Result<ChainRpcManager, RpcError> {
    let listener = TcpListener::bind(cfg.chain_rpc_bind).await?;
    let local_addr = listener.local_addr()?;
    info!("chain rpc listening on {}", local_addr);

    let (attach_tx, attach_rx) = mpsc::channel(cfg.stream_channel_size);
    let (manager_tx, manager_rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = ChainRpcWorker {
        cfg,
        scheduler,
        listener,
        attach_rx,
        manager_rx,
        stop_tx,
        stop_rx,
        next_stream_id: 0,
    };
    let join_handle = tokio::spawn(worker.run_loop());
    Ok(ChainRpcManager {
        join_handle,
        manager_tx,
        local_addr,
        connector: ChainStreamConnector(attach_tx),
    })
}

struct ChainRpcWorker {
    cfg: RpcConfig,
    scheduler: SchedulerCommandSender,
    listener: TcpListener,
    attach_rx: mpsc::Receiver<DuplexStream>,
    manager_rx: mpsc::Receiver<()>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    next_stream_id: u64,
}

impl ChainRpcWorker {
    async fn run_loop(mut self) -> Result<(), RpcError> {
        let mut streams = FuturesUnordered::new();
        loop {
            tokio::select! {
                biased;
                _ = self.manager_rx.recv() => break,
                Some(res) = streams.next(), if !streams.is_empty() => {
                    if let Err(err) = res {
                        warn!("chain stream task crashed: {}", err);
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, remote_addr)) => {
                        if let Err(err) = socket.set_nodelay(true) {
                            debug!("could not set nodelay for {}: {}", remote_addr, err);
                        }
                        let id = self.next_id();
                        info!("chain {} connected from {}", id, remote_addr);
                        streams.push(self.spawn_stream(socket, id));
                    }
                    Err(err) => warn!("chain rpc accept failed: {}", err),
                },
                Some(stream) = self.attach_rx.recv() => {
                    let id = self.next_id();
                    debug!("chain {} attached in memory", id);
                    streams.push(self.spawn_stream(stream, id));
                }
            }
        }

        let _ = self.stop_tx.send(true);
        while let Some(res) = streams.next().await {
            if let Err(err) = res {
                warn!("chain stream task crashed: {}", err);
            }
        }
        Ok(())
    }

    fn next_id(&mut self) -> ChainStreamId {
        self.next_stream_id += 1;
        ChainStreamId(self.next_stream_id)
    }

    fn spawn_stream<S>(&self, stream: S, id: ChainStreamId) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(serve_chain_stream(
            stream,
            id,
            self.cfg.clone(),
            self.scheduler.clone(),
            self.stop_rx.clone(),
        ))
    }
}

/// What a chain message asks the stream to do next.
enum Dispatch {
    Continue,
    Close(String),
}

async fn serve_chain_stream<S>(
    stream: S,
    id: ChainStreamId,
    cfg: RpcConfig,
    scheduler: SchedulerCommandSender,
    mut stop_rx: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = ReadBinder::new(read_half, cfg.max_recv_bytes());
    let (out_tx, out_rx) = mpsc::channel(cfg.stream_channel_size);
    let writer_task = tokio::spawn(write_loop(
        WriteBinder::new(write_half, cfg.max_send_bytes()),
        out_rx,
        cfg.write_timeout,
    ));
    let chain_stream = ChainStream::new(id, out_tx);
    let mut chain_ids: Vec<String> = Vec::new();

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => break Some("engine stopping".to_string()),
            // the writer gave up, most likely on a chain that stopped reading
            _ = chain_stream.closed() => break Some("writer closed".to_string()),
            next = reader.next() => next,
        };
        match next {
            Ok(Some((index, msg))) => {
                engine_trace!("chain_rpc.stream.recv", {
                    "stream": id.0,
                    "index": index,
                    "msg_type": msg.msg_type().as_str_name(),
                    "tx_id": msg.tx_id
                });
                match dispatch(msg, &chain_stream, &scheduler, &mut chain_ids).await {
                    Dispatch::Continue => {}
                    Dispatch::Close(reason) => break Some(reason),
                }
            }
            Ok(None) => break None,
            Err(err) => break Some(err.to_string()),
        }
    };
    match &reason {
        Some(reason) => info!("{} closed: {}", id, reason),
        None => info!("{} closed by the chain", id),
    }

    if let Err(err) = scheduler.connection_stopped(id, chain_ids).await {
        debug!("could not report the end of {}: {}", id, err);
    }
    drop(chain_stream);
    flush_writer(writer_task, cfg.flush_timeout, &id.to_string()).await;
}

async fn dispatch(
    msg: EngineMessage,
    chain_stream: &ChainStream,
    scheduler: &SchedulerCommandSender,
    chain_ids: &mut Vec<String>,
) -> Dispatch {
    let res = match msg.msg_type() {
        MessageType::TxRequest => {
            if !msg.chain_id.is_empty() && !chain_ids.contains(&msg.chain_id) {
                chain_ids.push(msg.chain_id.clone());
            }
            scheduler.submit_tx(msg, chain_stream.clone()).await
        }
        MessageType::GetByteCodeResp => scheduler.bytecode_response(msg).await,
        MessageType::GetStateResp | MessageType::CreateKvIteratorResp => {
            scheduler.state_response(msg).await
        }
        other => {
            let reason = format!("unexpected {} on a chain stream", other.as_str_name());
            warn!("{}: {}", chain_stream.id(), reason);
            let err = EngineMessage::new(MessageType::Error, &msg.chain_id, &msg.tx_id)
                .with_status(TxStatus::ProtocolError, reason.clone());
            let _ = chain_stream.try_send(err);
            return Dispatch::Close(reason);
        }
    };
    match res {
        Ok(()) => Dispatch::Continue,
        Err(err) => Dispatch::Close(format!("scheduler unavailable: {}", err)),
    }
}
