//! Real-time channel lifecycle
//!
//! - [`state`] - pure connection state machine and reconnect settings
//! - [`frame`] - subscribe/unsubscribe control frames and inbound events
//! - [`transport`] - `Connector`/`Channel` seam
//! - [`memory`], [`websocket`] - transports
//! - [`manager`] - the driver tying it together

pub mod frame;
pub mod manager;
pub mod memory;
pub mod state;
pub mod transport;
pub mod websocket;

pub use frame::{ChannelEvent, OutboundFrame};
pub use manager::{ConnectionManager, ConnectionManagerBuilder, HandlerId, WILDCARD};
pub use memory::MemoryConnector;
pub use state::{
    ConnectionSnapshot, ConnectionState, ConnectionStats, InvalidTransition, Phase, ReconnectDecision,
    ReconnectSettings,
};
pub use transport::{Channel, Connector, Incoming};
pub use websocket::WsConnector;
