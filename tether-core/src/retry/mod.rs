//! Retry policies and the engine that applies them
//!
//! - [`RetryPolicy`] - attempt budget and backoff schedule
//! - [`RetryPolicyEngine`] - attempt counters and one-shot delayed re-invocation
//! - [`ProgressObserver`] - countdown / outcome side channel

pub mod engine;
pub mod policy;

pub use engine::{ProgressEvent, ProgressObserver, RetryPolicyEngine, RetryProgress};
pub use policy::{BackoffStrategy, RetryPolicy};
