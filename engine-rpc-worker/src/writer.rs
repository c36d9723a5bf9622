// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_models::EngineMessage;
use engine_rpc_exports::{RpcError, WriteBinder};
use engine_time::EngineTime;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Single writer of a stream: drains `out_rx` until every sender is gone.
/// A frame not written within `write_timeout` fails the stream.
pub(crate) async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: WriteBinder<W>,
    mut out_rx: mpsc::Receiver<EngineMessage>,
    write_timeout: EngineTime,
) -> Result<(), RpcError> {
    while let Some(msg) = out_rx.recv().await {
        match timeout(write_timeout.to_duration(), writer.send(&msg)).await {
            Ok(res) => {
                res?;
            }
            Err(_) => return Err(RpcError::WriteTimeout(write_timeout)),
        }
    }
    Ok(())
}

/// Gives a writer task `flush_timeout` to drain, then aborts it.
pub(crate) async fn flush_writer(
    mut writer_task: JoinHandle<Result<(), RpcError>>,
    flush_timeout: EngineTime,
    stream: &str,
) {
    match timeout(flush_timeout.to_duration(), &mut writer_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => debug!("writer of {} failed: {}", stream, err),
        Ok(Err(err)) => debug!("writer of {} crashed: {}", stream, err),
        Err(_) => {
            debug!("writer of {} did not flush in time", stream);
            writer_task.abort();
        }
    }
}
