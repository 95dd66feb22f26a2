// crates/nexus-mcp-core/src/channel.rs
// ============================================================================
// Module: Duplex Message Channel
// Description: Generic bidirectional JSON-RPC message channel contract.
// Purpose: Decouple the bridge from concrete transports (memory, stdio).
// Dependencies: async-trait, thiserror, tokio
// ============================================================================

//! ## Overview
//! A duplex channel is a pair of halves: a [`MessageSource`] yielding inbound
//! messages and a [`MessageSink`] accepting outbound ones. `Ok(None)` from
//! [`MessageSource::receive`] means the peer closed its side cleanly.
//! [`ChannelError::Malformed`] is recoverable: the next `receive` may succeed.
//!
//! [`memory_duplex`] returns two connected in-process endpoints.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::JsonRpcMessage;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Channel errors.
///
/// # Invariants
/// - Only [`ChannelError::Malformed`] leaves the channel usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel is closed or its backing session ended abnormally.
    #[error("transport closed: {0}")]
    TransportClosed(String),
    /// One inbound frame could not be parsed.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// An inbound frame exceeded the configured size limit.
    #[error("payload too large: {size} bytes exceeds {limit}")]
    PayloadTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// Underlying I/O failure.
    #[error("channel io error: {0}")]
    Io(String),
}

impl ChannelError {
    /// Returns true when the channel can still be read after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Inbound half of a duplex channel.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next inbound message; `Ok(None)` on clean close.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when a frame is malformed or the channel
    /// fails.
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, ChannelError>;
}

/// Outbound half of a duplex channel.
#[async_trait]
pub trait MessageSink: Send {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::TransportClosed`] when the peer is gone.
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), ChannelError>;

    /// Closes the outbound half. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when flushing fails.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Box<T> {
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, ChannelError> {
        (**self).receive().await
    }
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), ChannelError> {
        (**self).send(message).await
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        (**self).close().await
    }
}

// ============================================================================
// SECTION: In-Memory Channel
// ============================================================================

/// In-memory inbound half.
#[derive(Debug)]
pub struct MemorySource {
    /// Receiving end of the peer's outbound queue.
    receiver: mpsc::Receiver<JsonRpcMessage>,
}

/// In-memory outbound half.
#[derive(Debug)]
pub struct MemorySink {
    /// Sending end; `None` once closed.
    sender: Option<mpsc::Sender<JsonRpcMessage>>,
}

/// One side of an in-memory duplex channel.
#[derive(Debug)]
pub struct DuplexEndpoint {
    /// Messages arriving from the peer.
    pub source: MemorySource,
    /// Messages going to the peer.
    pub sink: MemorySink,
}

impl DuplexEndpoint {
    /// Splits the endpoint into its halves.
    #[must_use]
    pub fn split(self) -> (MemorySource, MemorySink) {
        (self.source, self.sink)
    }
}

/// Creates two connected endpoints with `buffer` slots per direction.
#[must_use]
pub fn memory_duplex(buffer: usize) -> (DuplexEndpoint, DuplexEndpoint) {
    let (left_tx, right_rx) = mpsc::channel(buffer.max(1));
    let (right_tx, left_rx) = mpsc::channel(buffer.max(1));
    let left = DuplexEndpoint {
        source: MemorySource {
            receiver: left_rx,
        },
        sink: MemorySink {
            sender: Some(left_tx),
        },
    };
    let right = DuplexEndpoint {
        source: MemorySource {
            receiver: right_rx,
        },
        sink: MemorySink {
            sender: Some(right_tx),
        },
    };
    (left, right)
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, ChannelError> {
        Ok(self.receiver.recv().await)
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), ChannelError> {
        let Some(sender) = &self.sender else {
            return Err(ChannelError::TransportClosed("sink closed".to_string()));
        };
        sender
            .send(message)
            .await
            .map_err(|_| ChannelError::TransportClosed("peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.sender = None;
        Ok(())
    }
}
