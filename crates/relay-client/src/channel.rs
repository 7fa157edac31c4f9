//! Newline-delimited JSON channel over a stream socket.
//!
//! The socket is split into a [`FrameWriter`] (owned by the connection link,
//! shared by all senders) and a [`FrameReader`] (owned by the receive loop).

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use iotc_relay_protocol::constants::MAX_LINE_LEN;
use iotc_relay_protocol::encode_line;

use crate::error::RelayError;
use crate::target::ConnectionTarget;
use crate::types::RelayConfig;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 4096;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Result of waiting for the next message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete JSON object.
    Message(Map<String, Value>),
    /// A line that was dropped (bad UTF-8, bad JSON, not an object, or too
    /// long). The channel is still usable.
    Malformed(String),
    /// No complete line arrived within the timeout.
    Idle,
    /// The peer closed the connection.
    Closed,
}

/// A connected socket, not yet split.
pub struct FramedChannel {
    reader: FrameReader,
    writer: FrameWriter,
}

impl FramedChannel {
    /// Opens the transport for `target` with a bounded connect timeout.
    pub async fn connect(
        target: &ConnectionTarget,
        config: &RelayConfig,
    ) -> Result<Self, RelayError> {
        match target {
            ConnectionTarget::Tcp { host, port } => {
                let stream = bounded_connect(
                    target,
                    config.connect_timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await?;
                let _ = stream.set_nodelay(true);
                let (read, write) = stream.into_split();
                Ok(Self::from_halves(read, write, config.write_timeout))
            }
            #[cfg(unix)]
            ConnectionTarget::Local { path } => {
                let stream = bounded_connect(
                    target,
                    config.connect_timeout,
                    tokio::net::UnixStream::connect(path),
                )
                .await?;
                let (read, write) = stream.into_split();
                Ok(Self::from_halves(read, write, config.write_timeout))
            }
            #[cfg(not(unix))]
            ConnectionTarget::Local { path } => Err(RelayError::Unsupported(format!(
                "local socket {} requires a Unix platform",
                path.display()
            ))),
        }
    }

    /// Wraps an arbitrary bidirectional stream.
    #[cfg(test)]
    fn new<S>(stream: S, write_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::from_halves(read, write, write_timeout)
    }

    /// Wraps already-split halves of a socket.
    pub fn from_halves<R, W>(read: R, write: W, write_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write, write_timeout),
        }
    }

    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

async fn bounded_connect<T>(
    target: &ConnectionTarget,
    timeout: Duration,
    connect: impl Future<Output = std::io::Result<T>>,
) -> Result<T, RelayError> {
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(RelayError::ConnectFailure {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(RelayError::Timeout),
    }
}

/// Write half: one JSON object plus `\n` per call.
pub struct FrameWriter {
    inner: BoxWriter,
    timeout: Duration,
}

impl FrameWriter {
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static, timeout: Duration) -> Self {
        Self {
            inner: Box::new(inner),
            timeout,
        }
    }

    /// Serializes `msg` and writes it as a single line.
    ///
    /// The whole line is handed to the socket in one `write_all`, so
    /// concurrent writers never interleave partial lines as long as they
    /// share this writer behind a lock.
    pub async fn write<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), RelayError> {
        let line = encode_line(msg)?;
        self.write_line(&line).await
    }

    /// Writes pre-encoded bytes. The caller is responsible for framing.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<(), RelayError> {
        let inner = &mut self.inner;
        let io = async {
            inner.write_all(line).await?;
            inner.flush().await
        };
        match tokio::time::timeout(self.timeout, io).await {
            Ok(Ok(())) => {
                trace!(bytes = line.len(), "frame written");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RelayError::Timeout),
        }
    }

    /// Best-effort half-close of the write side.
    pub async fn shutdown(&mut self) {
        let _ = tokio::time::timeout(self.timeout, self.inner.shutdown()).await;
    }
}

/// Read half: buffers bytes and yields whole lines.
pub struct FrameReader {
    inner: BoxReader,
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a newline.
    scanned: usize,
    max_line_len: usize,
    /// Set after an oversized line until its terminating newline arrives.
    discarding: bool,
}

impl FrameReader {
    pub fn new(inner: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            buf: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
            max_line_len: MAX_LINE_LEN,
            discarding: false,
        }
    }

    /// Overrides the line length limit.
    #[cfg(test)]
    fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Waits up to `timeout` for the next complete line.
    ///
    /// Lines already buffered are returned without touching the socket.
    /// Cancel-safe: bytes read before a cancellation stay in the buffer.
    pub async fn read_next(&mut self, timeout: Duration) -> Result<Frame, RelayError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(frame) = self.take_line() {
                return Ok(frame);
            }

            let n = match tokio::time::timeout_at(deadline, self.inner.read(&mut chunk)).await {
                Ok(result) => result?,
                Err(_) => return Ok(Frame::Idle),
            };
            if n == 0 {
                return Ok(Frame::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Extracts the next non-empty line from the buffer, if any.
    fn take_line(&mut self) -> Option<Frame> {
        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                if self.discarding {
                    self.buf.clear();
                    self.scanned = 0;
                } else if self.buf.len() > self.max_line_len {
                    self.buf.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Some(Frame::Malformed(format!(
                        "line exceeds {} bytes",
                        self.max_line_len
                    )));
                }
                return None;
            };

            let pos = self.scanned + offset;
            self.scanned = 0;
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = &line[..pos];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_line_len {
                return Some(Frame::Malformed(format!(
                    "line exceeds {} bytes",
                    self.max_line_len
                )));
            }
            return Some(decode_line(line));
        }
    }
}

fn decode_line(line: &[u8]) -> Frame {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => {
            trace!(bytes = line.len(), "frame received");
            Frame::Message(map)
        }
        Ok(_) => Frame::Malformed("not a JSON object".into()),
        Err(e) => Frame::Malformed(e.to_string()),
    }
}
