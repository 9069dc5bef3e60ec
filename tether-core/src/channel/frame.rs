//! Channel wire format
//!
//! Outbound control frames declare interest in topics:
//!
//! ```json
//! {"type":"subscribe","topics":["alerts","audit"]}
//! ```
//!
//! Inbound frames are tagged events `{type, data, timestamp}`.

use crate::core::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control frame sent to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

impl OutboundFrame {
    pub fn subscribe<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Subscribe {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    pub fn unsubscribe<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Unsubscribe {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// Event received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    /// Server timestamp, passed through untouched
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ChannelEvent {
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
