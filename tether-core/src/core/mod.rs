//! Core types shared by every component
//!
//! - `ErrorDetails`: the canonical failure record produced by classification
//! - `ErrorCategory` / `Severity`: the failure taxonomy
//! - Error enums for the layer's own failure modes (retry, policy, channel)

pub mod errors;
pub mod types;

pub use errors::{ConnectionError, PolicyError, RetryError, TransportError};
pub use types::{DiagnosticInfo, ErrorCategory, ErrorContext, ErrorDetails, ErrorId, Severity};
