//! Message-framed channel capability.
//!
//! The engine does not speak to a socket; it consumes a duplex transport
//! that delivers one complete SFTP packet per message and accepts one
//! packet per [`send`](MessageChannel::send). Over SSH this is a subsystem
//! channel; in tests it is a pair of in-process queues. Inbound traffic
//! reaches the session as a stream of [`ChannelEvent`]s.

use async_trait::async_trait;
use skiff_platform::SkiffResult;
use std::fmt;

/// Close code for a transport aborted by the peer.
pub const ECONNABORTED: &str = "ECONNABORTED";

/// Close code for a peer that announced it is going away.
pub const X_GOINGAWAY: &str = "X_GOINGAWAY";

/// Error reported by the channel on teardown.
#[derive(Debug, Clone)]
pub struct ChannelError {
    /// Transport-level error code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

impl ChannelError {
    /// Creates a channel error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this close is a clean client-initiated shutdown rather than
    /// a transport failure.
    pub fn is_clean_shutdown(&self) -> bool {
        self.code == ECONNABORTED || self.code == X_GOINGAWAY
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ChannelError {}

/// Inbound channel traffic, delivered to the session in arrival order.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One complete framed SFTP packet
    Message(Vec<u8>),
    /// The transport went away; `None` means an orderly close
    Close(Option<ChannelError>),
}

/// The outbound half of the transport.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Transmits one packet.
    async fn send(&self, packet: &[u8]) -> SkiffResult<()>;

    /// Initiates teardown. Must be safe to call more than once.
    async fn close(&self);
}
