// crates/nexus-mcp-gateway/src/framing.rs
// ============================================================================
// Module: Content-Length Framing
// Description: MCP stdio framing over async byte streams.
// Purpose: Adapt byte streams to the duplex message channel contract.
// Dependencies: async-trait, serde_json, tokio
// ============================================================================

//! ## Overview
//! Each frame is a header block (`Content-Length: N`, optional other headers,
//! blank line) followed by `N` bytes of JSON. Header blocks are capped at
//! [`MAX_HEADER_BYTES`]; bodies are capped by the configured limit.
//!
//! A body that is not a JSON-RPC message is reported as
//! [`ChannelError::Malformed`] and the stream stays aligned on the next frame.
//! Header violations and oversized bodies leave the stream unaligned and are
//! fatal to the channel.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use nexus_mcp_core::ChannelError;
use nexus_mcp_core::JsonRpcMessage;
use nexus_mcp_core::MessageSink;
use nexus_mcp_core::MessageSource;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum size of one frame's header block in bytes.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Header carrying the body length.
const CONTENT_LENGTH_HEADER: &str = "Content-Length";

// ============================================================================
// SECTION: Frame Codec
// ============================================================================

/// Reads one frame body.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame starts.
///
/// # Errors
///
/// Returns [`ChannelError::Io`] for header violations,
/// [`ChannelError::PayloadTooLarge`] when the declared body exceeds
/// `max_body_bytes`, and [`ChannelError::TransportClosed`] when the stream
/// ends inside a frame.
pub async fn read_frame<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<Vec<u8>>, ChannelError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut content_length: Option<usize> = None;
    let mut header_bytes = 0usize;
    let mut saw_header = false;
    let mut line = String::new();
    loop {
        line.clear();
        let remaining = MAX_HEADER_BYTES.saturating_sub(header_bytes);
        let limit = u64::try_from(remaining).unwrap_or(u64::MAX).saturating_add(1);
        let read = (&mut *reader)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|err| ChannelError::Io(format!("frame header read failed: {err}")))?;
        if read == 0 {
            if !saw_header {
                return Ok(None);
            }
            return Err(ChannelError::TransportClosed(
                "stream ended inside frame header".to_string(),
            ));
        }
        if read > remaining {
            return Err(ChannelError::Io("frame header exceeds size limit".to_string()));
        }
        header_bytes += read;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            // Blank lines before the first header are frame separators.
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(ChannelError::Io(format!("invalid frame header: {trimmed}")));
        };
        if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH_HEADER) {
            continue;
        }
        if content_length.is_some() {
            return Err(ChannelError::Io("duplicate content length header".to_string()));
        }
        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|_| ChannelError::Io("invalid content length".to_string()))?;
        content_length = Some(parsed);
    }
    let size = content_length
        .ok_or_else(|| ChannelError::Io("missing content length header".to_string()))?;
    if size > max_body_bytes {
        return Err(ChannelError::PayloadTooLarge {
            size,
            limit: max_body_bytes,
        });
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ChannelError::TransportClosed("stream ended inside frame body".to_string())
        } else {
            ChannelError::Io(format!("frame body read failed: {err}"))
        }
    })?;
    Ok(Some(body))
}

/// Writes one frame and flushes the writer.
///
/// # Errors
///
/// Returns [`ChannelError::Io`] when the write fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin + Send,
{
    let header = format!("{CONTENT_LENGTH_HEADER}: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await.map_err(write_error)?;
    writer.write_all(payload).await.map_err(write_error)?;
    writer.flush().await.map_err(write_error)
}

/// Maps a write failure.
fn write_error(err: std::io::Error) -> ChannelError {
    if err.kind() == std::io::ErrorKind::BrokenPipe {
        ChannelError::TransportClosed("peer closed the stream".to_string())
    } else {
        ChannelError::Io(format!("frame write failed: {err}"))
    }
}

// ============================================================================
// SECTION: Channel Halves
// ============================================================================

/// Inbound half reading framed JSON-RPC messages.
pub struct FramedReader<R> {
    /// Buffered byte stream.
    reader: BufReader<R>,
    /// Body size limit in bytes.
    max_body_bytes: usize,
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wraps `reader` with the given body size limit.
    #[must_use]
    pub fn new(reader: R, max_body_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_body_bytes,
        }
    }
}

#[async_trait]
impl<R> MessageSource for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, ChannelError> {
        let Some(body) = read_frame(&mut self.reader, self.max_body_bytes).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| ChannelError::Malformed(err.to_string()))
    }
}

/// Outbound half writing framed JSON-RPC messages.
pub struct FramedWriter<W> {
    /// Byte stream.
    writer: W,
    /// Set once `close` has run.
    closed: bool,
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps `writer`.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    /// Returns the wrapped writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> MessageSink for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::TransportClosed("sink closed".to_string()));
        }
        let payload = serde_json::to_vec(&message)
            .map_err(|err| ChannelError::Io(format!("message serialization failed: {err}")))?;
        write_frame(&mut self.writer, &payload).await
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await.map_err(write_error)
    }
}
