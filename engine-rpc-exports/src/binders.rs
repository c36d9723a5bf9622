// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::RpcError;
use engine_models::EngineMessage;
use futures::{SinkExt, StreamExt};
use prost::bytes::Bytes;
use prost::Message;
use std::marker::Unpin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Writes length-delimited, prost-encoded messages.
pub struct WriteBinder<T: AsyncWrite + Unpin> {
    framed_writer: FramedWrite<T, LengthDelimitedCodec>,
    message_index: u64,
}

impl<T: AsyncWrite + Unpin> WriteBinder<T> {
    /// Frames larger than `max_frame_length` bytes are refused with an IO error.
    pub fn new(writer: T, max_frame_length: usize) -> Self {
        WriteBinder {
            framed_writer: FramedWrite::new(writer, codec(max_frame_length)),
            message_index: 0,
        }
    }

    /// Sends a message, returning its index on this stream.
    pub async fn send(&mut self, msg: &EngineMessage) -> Result<u64, RpcError> {
        self.framed_writer
            .send(Bytes::from(msg.encode_to_vec()))
            .await?;
        let res_index = self.message_index;
        self.message_index += 1;
        Ok(res_index)
    }
}

/// Reads length-delimited, prost-encoded messages.
pub struct ReadBinder<T: AsyncRead + Unpin> {
    framed_reader: FramedRead<T, LengthDelimitedCodec>,
    message_index: u64,
}

impl<T: AsyncRead + Unpin> ReadBinder<T> {
    /// Frames announcing more than `max_frame_length` bytes fail the stream.
    pub fn new(reader: T, max_frame_length: usize) -> Self {
        ReadBinder {
            framed_reader: FramedRead::new(reader, codec(max_frame_length)),
            message_index: 0,
        }
    }

    /// Next message with its index, `None` once the peer closed the stream.
    pub async fn next(&mut self) -> Result<Option<(u64, EngineMessage)>, RpcError> {
        let buf = match self.framed_reader.next().await {
            Some(b) => b?,
            None => return Ok(None),
        };
        let res_msg = EngineMessage::decode(buf)?;
        let res_index = self.message_index;
        self.message_index += 1;
        Ok(Some((res_index, res_msg)))
    }
}
