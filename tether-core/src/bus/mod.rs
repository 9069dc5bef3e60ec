//! Error listener bus and suppression
//!
//! The bus fans notifications out to UI listeners. Delivery is synchronous on
//! the publishing task, so notifications for the same error id arrive in the
//! order they were published.

pub mod listener;
pub mod suppression;

pub use listener::{BusStats, ErrorListener, ErrorListenerBus, PublishOutcome, Subscription};
pub use suppression::SuppressionRegistry;
