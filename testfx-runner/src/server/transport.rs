// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framing and exchange of RPC messages over a byte stream.
//!
//! Every frame is a `Content-Length` header (optionally followed by a `Content-Type` header), an
//! empty line and a UTF-8 JSON-RPC 2.0 body of exactly that many bytes.

use crate::errors::TransportError;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use testfx_metadata::RpcMessage;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

const HEADER_END: &[u8] = b"\r\n\r\n";

// Headers are tiny; anything longer than this without an empty line is garbage.
const MAX_HEADER_LEN: usize = 8 * 1024;

/// Encodes and decodes `Content-Length` framed RPC messages.
#[derive(Clone, Debug)]
pub struct RpcCodec {
    max_message_size: usize,
}

impl RpcCodec {
    /// Creates a new codec rejecting frame bodies larger than `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    fn parse_header(&self, header: &[u8]) -> Result<usize, TransportError> {
        let header = std::str::from_utf8(header).map_err(|_| TransportError::InvalidHeader {
            line: String::from_utf8_lossy(header).into_owned(),
        })?;

        let mut content_length = None;
        for line in header.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                return Err(TransportError::InvalidHeader {
                    line: line.to_owned(),
                });
            };
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| TransportError::InvalidHeader {
                        line: line.to_owned(),
                    })?;
                content_length = Some(length);
            } else if !name.eq_ignore_ascii_case("content-type") {
                trace!(header = name, "ignoring unknown frame header");
            }
        }

        let length = content_length.ok_or(TransportError::MissingContentLength)?;
        if length > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }
        Ok(length)
    }
}

impl Decoder for RpcCodec {
    type Item = RpcMessage;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header_len) = src
            .windows(HEADER_END.len())
            .position(|window| window == HEADER_END)
        else {
            if src.len() > MAX_HEADER_LEN {
                return Err(TransportError::InvalidHeader {
                    line: String::from_utf8_lossy(&src[..MAX_HEADER_LEN]).into_owned(),
                });
            }
            return Ok(None);
        };

        let body_len = self.parse_header(&src[..header_len])?;
        let frame_len = header_len + HEADER_END.len() + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header_len + HEADER_END.len());
        let body = src.split_to(body_len);
        // The frame is consumed even if the body is malformed, so the next frame can be read.
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(TransportError::Malformed)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.iter().all(u8::is_ascii_whitespace) => Ok(None),
            None => Err(TransportError::UnexpectedEof),
        }
    }
}

impl Encoder<&RpcMessage> for RpcCodec {
    type Error = TransportError;

    fn encode(&mut self, item: &RpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(item).map_err(TransportError::Serialize)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Reads and writes [`RpcMessage`]s over a duplex stream.
///
/// Reads and writes are independent: a task may write while another is waiting for the next
/// message.
#[derive(Debug)]
pub struct MessageHandler<T> {
    reader: Mutex<ReadState<T>>,
    writer: Mutex<WriteHalf<T>>,
    codec: RpcCodec,
}

#[derive(Debug)]
struct ReadState<T> {
    stream: ReadHalf<T>,
    buffer: BytesMut,
    codec: RpcCodec,
    eof: bool,
}

impl<T> MessageHandler<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a new handler over `stream`.
    pub fn new(stream: T, max_message_size: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let codec = RpcCodec::new(max_message_size);
        Self {
            reader: Mutex::new(ReadState {
                stream: reader,
                buffer: BytesMut::with_capacity(8 * 1024),
                codec: codec.clone(),
                eof: false,
            }),
            writer: Mutex::new(writer),
            codec,
        }
    }

    /// Reads the next message.
    ///
    /// Returns `Ok(None)` at the end of the stream, including when the peer reset the
    /// connection. A [`TransportError::Malformed`] error leaves the stream usable.
    ///
    /// This method is cancel safe.
    pub async fn read(&self) -> Result<Option<RpcMessage>, TransportError> {
        let mut state = self.reader.lock().await;
        let ReadState {
            stream,
            buffer,
            codec,
            eof,
        } = &mut *state;

        loop {
            if *eof {
                return codec.decode_eof(buffer);
            }
            if let Some(message) = codec.decode(buffer)? {
                return Ok(Some(message));
            }

            match stream.read_buf(buffer).await {
                Ok(0) => *eof = true,
                Ok(_) => {}
                Err(err) if is_peer_reset(&err) => {
                    debug!(error = %err, "connection reset by peer, treating as end of stream");
                    *eof = true;
                    buffer.clear();
                }
                Err(err) => return Err(TransportError::Read(err)),
            }
        }
    }

    /// Writes a message and flushes it.
    pub async fn write(&self, message: &RpcMessage) -> Result<(), TransportError> {
        // Serialize before taking the lock.
        let mut frame = BytesMut::new();
        self.codec.clone().encode(message, &mut frame)?;

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(TransportError::Write)?;
        writer.flush().await.map_err(TransportError::Write)
    }
}

fn is_peer_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
