//! 处置引擎：编排器与运行事件

pub mod events;
pub mod resolver;

pub use events::{ClarifyPrompt, EventPayload, Outcome, RunEvent, RunMetrics, RunSummary, StepRecord};
pub use resolver::{ClarifyAnswer, ResolutionRun, Resolver, RunLimits, RunRequest};
