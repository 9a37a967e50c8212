//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SYNAPSE__*` 覆盖（双下划线表示嵌套，如 `SYNAPSE__ENGINE__MAX_STEPS=8`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub push: PushSection,
    pub defaults: DefaultsSection,
    pub session: SessionSection,
    pub server: ServerSection,
}

/// [engine] 段：单次运行的步数与时间预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_steps: usize,
    pub max_seconds: u64,
    /// 每个事件之后的人为间隔（演示流式效果用，默认 0）
    pub stream_delay_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_seconds: 120,
            stream_delay_ms: 0,
        }
    }
}

impl EngineSection {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_seconds)
    }
}

/// [llm] 段：分类与证据分析共用的后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ keyword（离线关键词分类，不调用模型）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 60,
        }
    }
}

/// [tools] 段：工具超时与外部服务凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub timeout_secs: u64,
    pub google_maps_api_key: Option<String>,
    /// 可分配订单的 JSON 文件；未设置时使用内置示例订单
    pub orders_file: Option<PathBuf>,
    /// 附近搜索的默认半径（米）
    pub default_radius_m: u32,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            google_maps_api_key: None,
            orders_file: None,
            default_radius_m: 1500,
        }
    }
}

/// [push] 段：FCM 推送
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushSection {
    /// true 时只记录日志并模拟送达
    pub dry_run: bool,
    pub project_id: Option<String>,
    /// OAuth2 access token（由部署环境注入）
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            dry_run: true,
            project_id: None,
            access_token: None,
            timeout_secs: 10,
        }
    }
}

/// [defaults] 段：调用方未提供时使用的推送令牌
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DefaultsSection {
    pub customer_token: Option<String>,
    pub driver_token: Option<String>,
    pub passenger_token: Option<String>,
}

/// [session] 段：暂停会话的存储后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// memory / sqlite
    pub backend: String,
    pub sqlite_path: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: None,
        }
    }
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SYNAPSE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SYNAPSE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SYNAPSE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（长驻进程可在运行时调用并决定是否重建组件）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
