//! Timed session orchestration: idle -> engagement ritual -> crisis protocol hand-off.

pub mod error;
mod orchestrator;
pub mod scheduler;
mod timings;

pub use error::{OrchestratorError, SchedulingError, TimingError};
pub use orchestrator::{CompletionOutcome, SessionOrchestrator, SessionSnapshot, StartOutcome};
pub use scheduler::{ScheduledTask, StageScheduler, TokioScheduler};
pub use timings::StageTimings;
