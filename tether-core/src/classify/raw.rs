//! Inbound failure shapes
//!
//! A [`RawFailure`] is whatever the remote service or the runtime handed us
//! before classification. Operations wrapped by the layer return
//! `Result<T, RawFailure>`; the `From` impls let `?` lift strings, `anyhow`
//! errors, HTTP responses and channel faults into it.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Optional JSON body of a failed HTTP response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HttpBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// HTTP-response-shaped failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub body: Option<HttpBody>,
    /// Request target, recorded in diagnostics
    pub endpoint: Option<String>,
    pub latency: Option<Duration>,
}

impl HttpFailure {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: None,
            endpoint: None,
            latency: None,
        }
    }

    pub fn with_body(mut self, code: Option<&str>, message: Option<&str>) -> Self {
        self.body = Some(HttpBody {
            code: code.map(str::to_string),
            message: message.map(str::to_string),
        });
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(message) = self.body.as_ref().and_then(|b| b.message.as_deref()) {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Kind of real-time channel fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Transport error while connecting, sending or receiving
    Error,
    /// Peer or network closed the channel without us asking
    Close,
}

/// Raw error/close event from the real-time channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFault {
    pub kind: FaultKind,
    /// Close code, when the transport reports one
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl ChannelFault {
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Error,
            code: None,
            reason: Some(reason.into()),
        }
    }

    pub fn close(code: Option<u16>, reason: Option<String>) -> Self {
        Self {
            kind: FaultKind::Close,
            code,
            reason,
        }
    }
}

impl fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Error => f.write_str("channel error")?,
            FaultKind::Close => f.write_str("channel closed")?,
        }
        if let Some(code) = self.code {
            write!(f, " ({code})")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

/// Any failure before classification
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RawFailure {
    /// Free-text message
    #[error("{0}")]
    Message(String),

    /// Native error with optional stack or cause-chain text
    #[error("{message}")]
    Exception {
        message: String,
        stack: Option<String>,
    },

    #[error("{0}")]
    Http(HttpFailure),

    #[error("{0}")]
    Channel(ChannelFault),

    /// Payload of no recognizable shape
    #[error("unrecognized failure: {0}")]
    Unknown(Value),
}

impl RawFailure {
    /// Capture a native error together with its source chain
    pub fn exception(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        Self::Exception {
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    /// Detect the failure shape of an arbitrary JSON payload
    ///
    /// Strings become messages, objects with a numeric `status` become HTTP
    /// failures, `{type: "close" | "error"}` objects become channel faults and
    /// objects carrying a `message` become exceptions. Anything else is kept
    /// verbatim as [`RawFailure::Unknown`].
    pub fn from_json(value: Value) -> Self {
        match &value {
            Value::String(s) => return Self::Message(s.clone()),
            Value::Object(map) => {
                if let Some(status) = map.get("status").and_then(Value::as_u64) {
                    let body = map
                        .get("body")
                        .cloned()
                        .and_then(|b| serde_json::from_value::<HttpBody>(b).ok());
                    return Self::Http(HttpFailure {
                        status: u16::try_from(status).unwrap_or(0),
                        body,
                        endpoint: map.get("url").and_then(Value::as_str).map(str::to_string),
                        latency: None,
                    });
                }

                let reason = map
                    .get("reason")
                    .or_else(|| map.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match map.get("type").and_then(Value::as_str) {
                    Some("close") => {
                        let code = map
                            .get("code")
                            .and_then(Value::as_u64)
                            .and_then(|c| u16::try_from(c).ok());
                        return Self::Channel(ChannelFault::close(code, reason));
                    }
                    Some("error") => {
                        return Self::Channel(ChannelFault {
                            kind: FaultKind::Error,
                            code: None,
                            reason,
                        })
                    }
                    _ => {}
                }

                if let Some(message) = map.get("message").and_then(Value::as_str) {
                    return Self::Exception {
                        message: message.to_string(),
                        stack: map.get("stack").and_then(Value::as_str).map(str::to_string),
                    };
                }
            }
            _ => {}
        }
        Self::Unknown(value)
    }
}

impl From<&str> for RawFailure {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<String> for RawFailure {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<anyhow::Error> for RawFailure {
    fn from(err: anyhow::Error) -> Self {
        let chain: Vec<String> = err.chain().skip(1).map(|c| format!("caused by: {c}")).collect();
        Self::Exception {
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

impl From<HttpFailure> for RawFailure {
    fn from(value: HttpFailure) -> Self {
        Self::Http(value)
    }
}

impl From<ChannelFault> for RawFailure {
    fn from(value: ChannelFault) -> Self {
        Self::Channel(value)
    }
}

impl From<Value> for RawFailure {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(
            RawFailure::from_json(json!("boom")),
            RawFailure::Message("boom".to_string())
        );

        match RawFailure::from_json(json!({"status": 503, "body": {"code": "MAINTENANCE"}})) {
            RawFailure::Http(http) => {
                assert_eq!(http.status, 503);
                assert_eq!(http.body.unwrap().code.as_deref(), Some("MAINTENANCE"));
            }
            other => panic!("expected http, got {other:?}"),
        }

        match RawFailure::from_json(json!({"type": "close", "code": 1006})) {
            RawFailure::Channel(fault) => {
                assert_eq!(fault.kind, FaultKind::Close);
                assert_eq!(fault.code, Some(1006));
            }
            other => panic!("expected channel, got {other:?}"),
        }

        match RawFailure::from_json(json!({"message": "undefined is not a function", "stack": "at x"})) {
            RawFailure::Exception { message, stack } => {
                assert_eq!(message, "undefined is not a function");
                assert_eq!(stack.as_deref(), Some("at x"));
            }
            other => panic!("expected exception, got {other:?}"),
        }

        assert!(matches!(RawFailure::from_json(json!(42)), RawFailure::Unknown(_)));
        assert!(matches!(RawFailure::from_json(json!({"foo": 1})), RawFailure::Unknown(_)));
    }

    #[test]
    fn test_anyhow_chain_becomes_stack() {
        let err = anyhow::anyhow!("disk full").context("saving layout");
        match RawFailure::from(err) {
            RawFailure::Exception { message, stack } => {
                assert_eq!(message, "saving layout");
                assert!(stack.unwrap().contains("disk full"));
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn test_http_display() {
        let failure = HttpFailure::new(429).with_body(None, Some("slow down"));
        assert_eq!(failure.to_string(), "HTTP 429: slow down");
    }
}
