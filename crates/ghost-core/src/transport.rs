//! Line-framed command transport for the GHOST TCP protocol.
//!
//! The GHOST program accepts ASCII commands terminated by CR+LF and answers
//! (when a reply is due) with CR+LF terminated lines. This module implements
//! the request/response exchange with bounded waits; it has no knowledge of
//! the command vocabulary or acquisition semantics.
//!
//! All I/O methods take `&mut self`: ownership of the transport is what
//! guarantees at most one outstanding command awaits a reply at any time.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{GhostError, Result};

/// Default TCP port of the GHOST program.
pub const DEFAULT_PORT: u16 = 4000;

/// Default host the GHOST program listens on.
pub const DEFAULT_HOST: &str = "localhost";

/// Default per-command reply timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum encoded command length in bytes, terminator included.
pub const MAX_COMMAND_LEN: usize = 80;

/// Line terminator on both send and receive.
pub const TERMINATOR: &str = "\r\n";

/// How long to probe the socket for stale bytes when draining.
const DRAIN_PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Stream types the transport can run over.
///
/// Production code uses [`TcpStream`]; tests substitute an in-memory duplex
/// stream.
pub trait Wire: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Wire for T {}

type BoxedWire = Box<dyn Wire>;

/// Check a command against the protocol length limit.
///
/// The limit applies to the encoded command including the CR+LF terminator.
/// Callers that build commands from user-supplied strings (file names,
/// directory paths) can validate before starting a sequence, so no bytes are
/// written for a command that could never be sent.
pub fn validate_command(command: &str) -> Result<()> {
    let framed_len = command.len() + TERMINATOR.len();
    if framed_len > MAX_COMMAND_LEN {
        return Err(GhostError::Validation(format!(
            "command is {framed_len} bytes with terminator, protocol limit is {MAX_COMMAND_LEN}"
        )));
    }
    Ok(())
}

/// Line-framed request/response transport over a byte stream.
///
/// Holds at most one stream; [`close`](LineTransport::close) releases it and
/// is idempotent. After the peer closes the connection the transport marks
/// itself disconnected and every further operation fails with
/// [`GhostError::Connection`].
pub struct LineTransport {
    stream: Option<BufReader<BoxedWire>>,
}

impl LineTransport {
    /// Open a TCP connection to the GHOST program.
    ///
    /// Fails with [`GhostError::Connection`] if the host is unreachable
    /// within `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                GhostError::Connection(format!(
                    "connection to {addr} timed out after {connect_timeout:?}"
                ))
            })?
            .map_err(|e| GhostError::Connection(format!("failed to connect to {addr}: {e}")))?;

        // Disable Nagle's algorithm; commands are tiny and latency-bound.
        stream
            .set_nodelay(true)
            .map_err(|e| GhostError::Connection(format!("failed to configure socket: {e}")))?;

        tracing::info!(%addr, "connected to GHOST server");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-open stream.
    ///
    /// This is the seam tests use to run the transport over
    /// `tokio::io::duplex` instead of a real socket.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            stream: Some(BufReader::new(Box::new(stream))),
        }
    }

    /// Whether the transport currently holds a live stream.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one command, appending the protocol terminator.
    ///
    /// Fails with [`GhostError::Validation`] before any network write if the
    /// encoded command exceeds [`MAX_COMMAND_LEN`], and with
    /// [`GhostError::Transport`] if the write itself fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        validate_command(command)?;
        let framed = format!("{command}{TERMINATOR}");

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GhostError::Connection("transport is closed".to_string()))?;

        tracing::debug!(command, "sending command");

        stream
            .get_mut()
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| GhostError::Transport(format!("failed to write {command:?}: {e}")))?;
        stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| GhostError::Transport(format!("failed to flush {command:?}: {e}")))?;

        Ok(())
    }

    /// Wait for one full terminated reply line.
    ///
    /// Returns the line with the terminator stripped. Fails with
    /// [`GhostError::Timeout`] if no complete line arrives within
    /// `reply_timeout`, and with [`GhostError::Transport`] if the connection
    /// is lost mid-read (the transport is marked disconnected in that case).
    pub async fn read_reply(&mut self, reply_timeout: Duration) -> Result<String> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GhostError::Connection("transport is closed".to_string()))?;

        let mut line = String::new();
        let outcome = timeout(reply_timeout, stream.read_line(&mut line)).await;

        match outcome {
            Ok(Ok(0)) => {
                self.stream = None;
                Err(GhostError::Transport(
                    "connection closed by device".to_string(),
                ))
            }
            Ok(Ok(_)) => {
                let reply = line.trim_end_matches(['\r', '\n']).to_string();
                tracing::trace!(reply = %reply, "received reply");
                Ok(reply)
            }
            Ok(Err(e)) => Err(GhostError::Transport(format!("failed to read reply: {e}"))),
            Err(_) => Err(GhostError::Timeout(format!(
                "no reply within {reply_timeout:?}"
            ))),
        }
    }

    /// Discard any buffered or pending reply bytes.
    ///
    /// Used to swallow the GHOST welcome banner after connecting and to
    /// dispose of late replies after a timed-out operation, so a stale line
    /// is never matched against the next command. Returns the number of
    /// bytes discarded.
    pub async fn drain(&mut self) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        let mut discarded = 0usize;

        // Anything already sitting in the read buffer goes first.
        let buffered = stream.buffer().len();
        if buffered > 0 {
            stream.consume(buffered);
            discarded += buffered;
        }

        // Then probe the socket itself with a short deadline.
        let mut probe = [0u8; 256];
        loop {
            match timeout(DRAIN_PROBE_TIMEOUT, stream.get_mut().read(&mut probe)).await {
                Ok(Ok(0)) => break, // peer closed; the next read surfaces it
                Ok(Ok(n)) => discarded += n,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        if discarded > 0 {
            tracing::debug!(discarded, "discarded stale reply bytes");
        }
        Ok(discarded)
    }

    /// Close the transport.
    ///
    /// Shuts the stream down best-effort and releases it. Idempotent:
    /// closing an already-closed transport is a no-op, not an error.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
            tracing::info!("transport closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for LineTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}
