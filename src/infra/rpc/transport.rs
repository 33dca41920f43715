//! Message Transport Layer
//!
//! Moves framed JSON-RPC messages between host and extension without
//! knowing what they mean. Two families:
//! - stream transports: `Content-Length` framing over any async byte stream
//!   (child process stdio, our own stdin/stdout, in-process duplex pipes)
//! - memory transports: a connected pair over tokio channels, with optional
//!   artificial latency for ordering tests

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::protocol::Message;

/// Inbound half of a transport
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next message. `Ok(None)` marks a clean end of stream;
    /// `ErrorKind::InvalidData` marks a single malformed frame. Any other
    /// error leaves the transport unusable.
    async fn read(&mut self) -> io::Result<Option<Message>>;
}

/// Outbound half of a transport
#[async_trait]
pub trait MessageWriter: Send {
    async fn write(&mut self, message: &Message) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Both halves of one end of a link, plus the child process behind it (if any)
pub struct MessageTransports {
    pub reader: Box<dyn MessageReader>,
    pub writer: Box<dyn MessageWriter>,
    pub process: Option<Child>,
}

impl MessageTransports {
    pub fn new(reader: impl MessageReader + 'static, writer: impl MessageWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        }
    }

    /// Transports over this process's stdin/stdout (extension side)
    pub fn stdio() -> Self {
        Self::new(
            StreamReader::new(tokio::io::stdin()),
            StreamWriter::new(tokio::io::stdout()),
        )
    }

    /// Spawn an extension process and talk to it over its stdio
    pub fn spawn(command: &str, args: &[String]) -> io::Result<Self> {
        tracing::info!("Spawning extension process: {} {:?}", command, args);

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to get stdout"))?;

        let mut transports = Self::new(StreamReader::new(stdout), StreamWriter::new(stdin));
        transports.process = Some(child);
        Ok(transports)
    }
}

// ============================================================================
// Stream transport
// ============================================================================

/// Largest frame body a stream reader accepts
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Reads `Content-Length` framed messages:
/// ```text
/// Content-Length: 123\r\n
/// \r\n
/// {"jsonrpc":"2.0",...}
/// ```
pub struct StreamReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read headers and return Content-Length, or `None` at end of stream
    async fn read_headers(&mut self) -> io::Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut first = true;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if first {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Peer closed connection mid-frame",
                ));
            }
            first = false;

            let line = line.trim();

            // Empty line marks end of headers
            if line.is_empty() {
                break;
            }

            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                );
            }
            // Ignore other headers (Content-Type, etc.)
        }

        content_length
            .map(Some)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing Content-Length"))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for StreamReader<R> {
    async fn read(&mut self) -> io::Result<Option<Message>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        // The body cannot be skipped safely, so the stream is done
        if content_length > MAX_FRAME_BYTES {
            return Err(io::Error::other(format!(
                "frame of {} bytes exceeds the {} byte limit",
                content_length, MAX_FRAME_BYTES
            )));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;

        let json =
            String::from_utf8(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        tracing::trace!("RPC <- {}", json);

        Message::parse(&json)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub struct StreamWriter<W> {
    writer: Option<W>,
}

impl<W: AsyncWrite + Unpin + Send> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Some(inner),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for StreamWriter<W> {
    async fn write(&mut self, message: &Message) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Writer closed"))?;

        let json = message
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        tracing::trace!("RPC -> {}", json);

        let frame = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

// ============================================================================
// Memory transport
// ============================================================================

pub mod memory {
    use super::*;

    /// Receiving end; delays every message by `latency` before handing it out
    pub struct MemoryReader {
        rx: mpsc::UnboundedReceiver<String>,
        latency: Duration,
    }

    #[async_trait]
    impl MessageReader for MemoryReader {
        async fn read(&mut self) -> io::Result<Option<Message>> {
            let Some(json) = self.rx.recv().await else {
                return Ok(None);
            };
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            tracing::trace!("RPC <- {}", json);
            Message::parse(&json)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }

    pub struct MemoryWriter {
        tx: Option<mpsc::UnboundedSender<String>>,
    }

    impl MemoryWriter {
        /// Send an arbitrary frame, valid or not
        pub fn write_raw(&self, frame: impl Into<String>) -> io::Result<()> {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Writer closed"))?;
            tx.send(frame.into())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Peer dropped"))
        }
    }

    #[async_trait]
    impl MessageWriter for MemoryWriter {
        async fn write(&mut self, message: &Message) -> io::Result<()> {
            let json = message
                .to_json()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            tracing::trace!("RPC -> {}", json);
            self.write_raw(json)
        }

        async fn close(&mut self) -> io::Result<()> {
            self.tx.take();
            Ok(())
        }
    }

    /// Raw halves of one direction, for tests that inject malformed frames
    pub fn channel(latency: Duration) -> (MemoryWriter, MemoryReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryWriter { tx: Some(tx) }, MemoryReader { rx, latency })
    }

    /// Two connected ends: (host side, extension side)
    pub fn pair(latency: Duration) -> (MessageTransports, MessageTransports) {
        let (host_writer, extension_reader) = channel(latency);
        let (extension_writer, host_reader) = channel(latency);
        (
            MessageTransports::new(host_reader, host_writer),
            MessageTransports::new(extension_reader, extension_writer),
        )
    }
}
