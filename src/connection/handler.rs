//! Per-Client Connection Loop
//!
//! ```text
//! 1. Client connects, handler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────────┐
//!    │ decode next buffered request         │◄─┐
//!    │   none buffered? flush replies, then │  │
//!    │   wait for more bytes                │  │
//!    │ execute, buffer the reply            │──┘
//!    └──────────────────────────────────────┘
//!        │
//!        ▼
//! 3. Client closes, sends QUIT, or breaks the protocol
//! ```
//!
//! Replies are flushed only when no complete request is left in the read
//! buffer, so a pipelined batch is answered with a single write.
//!
//! A protocol violation cannot be recovered from on a byte stream. The client
//! gets one `-ERR Protocol error: ...` reply and the connection is closed.

use crate::commands::{is_quit, CommandHandler};
use crate::protocol::{ProtocolError, RespReader, RespValue, RespWriter};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Server-wide connection counters, shared by every connection and read by
/// INFO.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
    }
}

/// Why a connection ended abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => ConnectionError::Io(io),
            other => ConnectionError::Protocol(other),
        }
    }
}

/// One client's read-execute-reply loop.
pub struct ConnectionHandler<R, W> {
    reader: RespReader<R>,
    writer: RespWriter<W>,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler<OwnedReadHalf, OwnedWriteHalf> {
    /// Wraps an accepted TCP stream.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(read_half, write_half, addr, command_handler, stats)
    }
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Builds a handler over any pair of byte streams.
    pub fn from_parts(
        reader: R,
        writer: W,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            reader: RespReader::new(reader),
            writer: RespWriter::new(writer),
            addr,
            command_handler,
            stats,
        }
    }

    /// Serves the client until it disconnects, quits, or errors.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection closed with error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let request = match self.next_request().await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(ConnectionError::Protocol(e)) => {
                    self.reject(&e).await;
                    return Err(ConnectionError::Protocol(e));
                }
                Err(e) => return Err(e),
            };

            let quit = is_quit(&request);
            let reply = self.command_handler.execute(request);
            self.stats.command_processed();
            self.writer.write_value(&reply);

            if quit {
                self.flush().await?;
                return Ok(());
            }
        }
    }

    /// Returns the next request, flushing pending replies before waiting on
    /// the socket. `None` means the client closed the connection cleanly.
    async fn next_request(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if let Some(request) = self.reader.try_next_request()? {
            return Ok(Some(request));
        }

        self.flush().await?;

        let before = self.reader.bytes_read();
        let result = self.reader.read_request().await;
        self.stats.add_bytes_read(self.reader.bytes_read() - before);

        if let Ok(Some(_)) = &result {
            trace!(
                client = %self.addr,
                buffered = self.reader.buffered(),
                "Request decoded"
            );
        }
        Ok(result?)
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        let pending = self.writer.pending();
        if pending == 0 {
            return Ok(());
        }

        let before = self.writer.bytes_written();
        let result = self.writer.flush().await;
        self.stats
            .add_bytes_written(self.writer.bytes_written() - before);
        trace!(client = %self.addr, bytes = pending, "Replies flushed");
        Ok(result?)
    }

    /// Sends the protocol error reply. The connection is closing anyway, so a
    /// failed write is only logged.
    async fn reject(&mut self, error: &ProtocolError) {
        self.writer
            .write_value(&RespValue::error(format!("ERR Protocol error: {}", error)));
        if let Err(e) = self.flush().await {
            debug!(client = %self.addr, error = %e, "Could not send protocol error reply");
        }
    }
}

/// Runs a connection to completion. Errors are already logged by
/// [`ConnectionHandler::run`].
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let _ = ConnectionHandler::new(stream, addr, command_handler, stats)
        .run()
        .await;
}
