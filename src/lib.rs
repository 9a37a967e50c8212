//! Synapse - 末端物流异常处置引擎
//!
//! 模块划分：
//! - **assertion**: 步骤断言求值
//! - **classify**: 场景分类（LLM / 关键词）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、运行上下文、澄清回答归一化
//! - **engine**: 可恢复的处置编排器与事件流
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 初始化
//! - **policy**: 各类别的声明式策略表
//! - **session**: 暂停会话存储（内存 / SQLite）
//! - **tools**: 工具注册、调用与业务工具

pub mod assertion;
pub mod classify;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod observability;
pub mod policy;
pub mod session;
pub mod tools;

pub use engine::{Resolver, RunEvent, RunRequest};

use std::sync::Arc;

use crate::classify::{Classifier, KeywordClassifier, LlmClassifier};
use crate::config::AppConfig;
use crate::core::ResolveError;
use crate::engine::RunLimits;
use crate::llm::{LlmClient, OpenAiClient};
use crate::tools::ToolInvoker;

/// 按配置组装完整的 Resolver（LLM、工具、会话存储、预算与默认令牌）
pub async fn build_resolver(config: &AppConfig) -> Result<Resolver, ResolveError> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_config(&config.llm));
    let classifier: Arc<dyn Classifier> = if config.llm.provider.eq_ignore_ascii_case("keyword") {
        Arc::new(KeywordClassifier::new())
    } else {
        Arc::new(LlmClassifier::new(llm.clone()))
    };

    let registry = tools::default_registry(config, llm)
        .await
        .map_err(|e| ResolveError::Config(e.to_string()))?;
    let invoker = Arc::new(ToolInvoker::with_timeout_secs(registry, config.tools.timeout_secs));
    let sessions = session::create_session_store(&config.session).await;

    tracing::info!(
        provider = %config.llm.provider,
        max_steps = config.engine.max_steps,
        max_seconds = config.engine.max_seconds,
        "resolver ready"
    );
    Ok(Resolver::new(classifier, invoker, sessions)
        .with_limits(RunLimits::from(&config.engine))
        .with_defaults(config.defaults.clone()))
}
