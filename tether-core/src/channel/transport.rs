//! Transport seam
//!
//! The connection manager only speaks text frames through these traits, so
//! the reconnect logic is identical for the in-memory transport used in tests
//! and the WebSocket transport used in production.

use crate::core::TransportError;
use async_trait::async_trait;

/// What a channel produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// The peer closed the channel (or the stream ended)
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// Factory of channels; called once per connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Channel>, TransportError>;

    /// Human-readable endpoint, used in logs and diagnostics
    fn endpoint(&self) -> String;
}

/// One established connection
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound frame; must be cancel safe
    async fn recv(&mut self) -> Result<Incoming, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
