//! RESP over async byte streams.
//!
//! [`RespReader`] accumulates bytes from any [`AsyncRead`] into a `BytesMut`
//! buffer and hands complete values to the [`RespParser`]. TCP is a stream
//! protocol, so a single read may hold half a request or several pipelined
//! ones; the reader only ever consumes the bytes of the value it returns.
//!
//! [`RespWriter`] encodes replies into an in-memory buffer. Nothing reaches
//! the stream until [`RespWriter::flush`], which is also where write failures
//! surface. A failed flush leaves the peer with an unknown prefix of the
//! buffered bytes, so the connection must not be reused.

use crate::protocol::parser::{ProtocolError, RespParser, MAX_BULK_SIZE};
use crate::protocol::types::RespValue;
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Largest incomplete value the reader will buffer: one maximal bulk string
/// plus headroom for its header and sibling arguments.
pub const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Decodes RESP values from an async byte stream.
#[derive(Debug)]
pub struct RespReader<R> {
    inner: R,
    buffer: BytesMut,
    parser: RespParser,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            bytes_read: 0,
        }
    }

    /// Reads the next client request (an array of bulk strings).
    ///
    /// Returns `Ok(None)` when the peer closed the stream between requests.
    /// A close in the middle of a request is [`ProtocolError::UnexpectedEof`].
    pub async fn read_request(&mut self) -> Result<Option<RespValue>, ProtocolError> {
        self.read_frame(true).await
    }

    /// Reads the next value of any type.
    pub async fn read_value(&mut self) -> Result<Option<RespValue>, ProtocolError> {
        self.read_frame(false).await
    }

    /// Decodes a request that is already fully buffered, without touching
    /// the stream.
    pub fn try_next_request(&mut self) -> Result<Option<RespValue>, ProtocolError> {
        self.decode_buffered(true)
    }

    /// Total bytes pulled from the stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn read_frame(&mut self, request: bool) -> Result<Option<RespValue>, ProtocolError> {
        loop {
            if let Some(value) = self.decode_buffered(request)? {
                return Ok(Some(value));
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ProtocolError::MessageTooLarge {
                    size: self.buffer.len(),
                    max: MAX_BUFFER_SIZE,
                });
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::UnexpectedEof {
                        buffered: self.buffer.len(),
                    })
                };
            }
            self.bytes_read += n as u64;
        }
    }

    fn decode_buffered(&mut self, request: bool) -> Result<Option<RespValue>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let decoded = if request {
            self.parser.parse_request(&self.buffer)?
        } else {
            self.parser.parse(&self.buffer)?
        };

        Ok(decoded.map(|(value, consumed)| {
            self.buffer.advance(consumed);
            value
        }))
    }
}

/// Buffers encoded RESP values and writes them out on [`flush`](Self::flush).
#[derive(Debug)]
pub struct RespWriter<W> {
    inner: W,
    buffer: BytesMut,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> RespWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            bytes_written: 0,
        }
    }

    /// Encodes `value` into the pending buffer.
    pub fn write_value(&mut self, value: &RespValue) {
        value.serialize_into(&mut self.buffer);
    }

    /// Writes every pending byte to the stream and flushes it.
    ///
    /// The pending buffer is emptied whether or not the write succeeds.
    pub async fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let pending = self.buffer.split();
            self.inner.write_all(&pending).await?;
            self.bytes_written += pending.len() as u64;
        }
        self.inner.flush().await
    }

    /// Bytes encoded but not yet flushed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes successfully written to the stream.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
