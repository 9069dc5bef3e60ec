//! Recovery orchestration
//!
//! - [`RecoveryOrchestrator`] - classify, retry, fall back, notify
//! - [`Supervisor`] - catch-all boundary around guarded regions
//! - [`RecoveryOutcome`] - terminal result

pub mod orchestrator;
pub mod outcome;
pub mod supervisor;

pub use orchestrator::RecoveryOrchestrator;
pub use outcome::RecoveryOutcome;
pub use supervisor::Supervisor;
