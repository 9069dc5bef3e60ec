//! Tether Core - Client-side error recovery and real-time channel resilience
//!
//! Tether turns raw failures (HTTP errors, exceptions, channel drops) into one
//! canonical [`ErrorDetails`] record and decides what happens next: retry with
//! backoff, serve a fallback, and tell the user how bad it is.
//!
//! ## Architecture
//! - **One record**: every failure is classified before anything else sees it
//! - **Strategies by code**: a shared registry overrides defaults per error code
//! - **Fixed order**: retry, then fallback, then notify
//! - **Isolated listeners**: a panicking listener never affects its peers
//! - **Bounded reconnects**: a channel gives up after its attempt budget and
//!   says so with a critical notification
//!
//! ## Core Modules
//! - `core`: `ErrorDetails`, taxonomy and error enums
//! - `classify`: raw failure shapes and the classifier
//! - `strategy`: per-code recovery strategies
//! - `retry`: retry policies and the retry engine
//! - `fallback`: cached and substitute data
//! - `notify`: notification strategy selection
//! - `bus`: listener fan-out and suppression
//! - `recovery`: orchestrator and supervisor
//! - `channel`: connection state machine, manager and transports
//! - `config`: file and environment configuration
//! - `resilience`: wires everything from one configuration
//! - `monitoring`: Prometheus metrics

pub mod core;

pub mod bus;
pub mod channel;
pub mod classify;
pub mod config;
pub mod fallback;
pub mod monitoring;
pub mod notify;
pub mod recovery;
pub mod resilience;
pub mod retry;
pub mod strategy;
pub mod utils;

pub use core::{ErrorCategory, ErrorContext, ErrorDetails, ErrorId, Severity};

pub use bus::{ErrorListenerBus, SuppressionRegistry};
pub use channel::{ConnectionManager, MemoryConnector, Phase, WsConnector};
pub use classify::{ErrorClassifier, RawFailure};
pub use config::TetherConfig;
pub use fallback::{FallbackBehavior, FallbackProvider, FallbackValue};
pub use notify::{Notification, NotificationStrategy, NotificationStrategySelector};
pub use recovery::{RecoveryOrchestrator, RecoveryOutcome, Supervisor};
pub use resilience::Resilience;
pub use retry::{RetryPolicy, RetryPolicyEngine};
pub use strategy::{RecoveryStrategy, StrategyRegistry};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    // Core types
    pub use crate::core::{ErrorCategory, ErrorContext, ErrorDetails, ErrorId, Severity};

    // Classification and strategies
    pub use crate::classify::{ErrorClassifier, HttpFailure, RawFailure};
    pub use crate::strategy::{RecoveryStrategy, StrategyRegistry};

    // Recovery
    pub use crate::fallback::{FallbackBehavior, FallbackValue, Substitute};
    pub use crate::notify::{Notification, NotificationStrategy, Presentation};
    pub use crate::recovery::{RecoveryOrchestrator, RecoveryOutcome, Supervisor};
    pub use crate::retry::{BackoffStrategy, RetryPolicy};

    // Channel
    pub use crate::channel::{ChannelEvent, ConnectionManager, Phase, ReconnectSettings};

    pub use crate::config::TetherConfig;
    pub use crate::resilience::Resilience;

    // Error types
    pub use crate::{Error, Result};
}
