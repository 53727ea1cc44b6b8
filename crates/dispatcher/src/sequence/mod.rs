//! 多步骤序列的调度与链式推进

pub mod chaining;
pub mod scheduler;

pub use chaining::SequenceOutcomeHandler;
pub use scheduler::{SequenceStepScheduler, TickReport};
