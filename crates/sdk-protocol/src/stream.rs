// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Async reader/writer halves speaking framed protocol messages.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::encoding::{Decoder, Encoder, EncodingError};
use crate::header::MessageHeader;
use crate::message::ProtocolMessage;

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The peer closed the stream on a frame boundary.
    #[error("end of stream")]
    EndOfStream,
    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed in the middle of a frame")]
    ClosedMidFrame,
}

impl ReadError {
    /// A clean close, as opposed to a transport or framing failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadError::EndOfStream)
    }
}

/// Reads protocol messages off a byte stream, one at a time.
pub struct ProtocolReader<R> {
    reader: R,
    decoder: Decoder,
}

impl<R: AsyncRead + Unpin> ProtocolReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_decoder(reader, Decoder::default())
    }

    pub fn with_decoder(reader: R, decoder: Decoder) -> Self {
        Self { reader, decoder }
    }

    /// Read the next message, pulling more bytes off the transport as needed.
    pub async fn read_message(&mut self) -> Result<(MessageHeader, ProtocolMessage), ReadError> {
        loop {
            if let Some((header, message)) = self.decoder.consume_next()? {
                trace!(message_type = ?header.message_type(), "Read message");
                return Ok((header, message));
            }

            let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let n = self.reader.read_buf(&mut chunk).await?;
            if n == 0 {
                return if self.decoder.has_remaining() {
                    Err(ReadError::ClosedMidFrame)
                } else {
                    Err(ReadError::EndOfStream)
                };
            }
            self.decoder.push(chunk.freeze());
        }
    }
}

/// Writes protocol messages onto a byte stream.
///
/// Writes are serialized by construction: the writer is owned by a single
/// task and every write is flushed before the next one starts.
pub struct ProtocolWriter<W> {
    writer: W,
    encoder: Encoder,
}

impl<W: AsyncWrite + Unpin> ProtocolWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            encoder: Encoder::new(),
        }
    }

    pub async fn write_message(&mut self, msg: &ProtocolMessage) -> Result<(), std::io::Error> {
        trace!(message_type = ?msg.message_type(), "Writing message");
        let buf = self.encoder.encode(msg);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await
    }

    pub async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        self.writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pb;
    use bytes::Bytes;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let (read_half, _) = tokio::io::split(client);
        let (_, write_half) = tokio::io::split(server);

        let mut writer = ProtocolWriter::new(write_half);
        let mut reader = ProtocolReader::new(read_half);

        let msg: ProtocolMessage = pb::InputEntryMessage {
            value: Bytes::from_static(b"hello"),
        }
        .into();
        writer.write_message(&msg).await.unwrap();

        let (_, actual) = reader.read_message().await.unwrap();
        assert_eq!(actual, msg);
    }

    #[tokio::test]
    async fn clean_close_yields_end_of_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let (read_half, _) = tokio::io::split(client);
        drop(server);

        let mut reader = ProtocolReader::new(read_half);
        let err = reader.read_message().await.unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[tokio::test]
    async fn close_mid_frame_is_not_clean() {
        let (client, server) = tokio::io::duplex(1024);
        let (read_half, _) = tokio::io::split(client);
        let (_, mut write_half) = tokio::io::split(server);

        // Only the first half of the header goes out.
        write_half.write_all(&[0u8; 4]).await.unwrap();
        drop(write_half);

        let mut reader = ProtocolReader::new(read_half);
        let err = reader.read_message().await.unwrap_err();
        assert!(matches!(err, ReadError::ClosedMidFrame));
    }
}
