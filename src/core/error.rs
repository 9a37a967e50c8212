//! 错误类型
//!
//! ToolError 只在工具边界内流动，由 ToolInvoker 折叠为带 error 键的 Observation；
//! ResolveError 是调用方可见的错误（无效会话、缺少场景、引擎契约违背等）。

use thiserror::Error;

/// 工具执行错误（不会越过 ToolInvoker 传播到编排器）
#[derive(Error, Debug)]
pub enum ToolError {
    /// 参数无法反序列化为该工具的参数结构
    #[error("invalid_params: {0}")]
    InvalidParams(String),

    /// 上游服务（地图、推送、LLM）返回错误
    #[error("upstream_failure: {0}")]
    Upstream(String),

    /// 工具依赖的服务未配置（缺少 API Key 等）
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidParams(e.to_string())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Upstream(e.to_string())
    }
}

/// 解析一次处置运行时调用方可见的错误
#[derive(Error, Debug)]
pub enum ResolveError {
    /// 恢复时会话不存在或已过期
    #[error("invalid_or_expired_session: {0}")]
    InvalidSession(String),

    #[error("missing scenario")]
    MissingScenario,

    /// 策略产出了无法执行的步骤描述；运行中以 error 事件出现
    #[error("engine contract violation: {0}")]
    EngineContract(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<crate::session::SessionError> for ResolveError {
    fn from(e: crate::session::SessionError) -> Self {
        ResolveError::Store(e.to_string())
    }
}
