//! 核心类型层：错误分类、运行上下文、澄清回答归一化

pub mod answer;
pub mod context;
pub mod error;

pub use context::{Answers, Candidate, EvidenceAnalysis, GeoPoint, RunContext};
pub use error::{ResolveError, ToolError};
