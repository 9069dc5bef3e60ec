//! Monitoring and observability module
//!
//! Prometheus metrics for recovery decisions and channel lifecycle.

pub mod metrics;

pub use metrics::{ChannelMetrics, MetricsRegistry, RecoveryMetrics};
