//! LLM 客户端抽象
//!
//! 分类器只需要一次纯文本补全（LlmClient::complete）；证据分析需要把照片一起交给视觉模型
//! （LlmClient::complete_with_images）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 交给视觉模型的一张图片：`data:<mime>;base64,...` 或 http(s) URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInput {
    pub url: String,
}

impl ImageInput {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            url: format!("data:{mime};base64,{encoded}"),
        }
    }

    pub fn is_inline(&self) -> bool {
        self.url.starts_with("data:")
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 一条用户消息 = 文本 + 若干图片；不支持图片输入的后端返回 Err
    async fn complete_with_images(&self, prompt: &str, images: &[ImageInput]) -> Result<String, String> {
        let _ = (prompt, images);
        Err("this model client does not accept images".to_string())
    }
}

/// 从模型输出中取出 JSON 对象：先剥离 ``` 代码块，再退回到首个 `{...}` 片段
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let t = strip_code_fence(text);
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(t) {
        return Some(v);
    }
    let start = t.find('{')?;
    let end = t.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&t[start..=end]) {
        Ok(v @ serde_json::Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let mut parts = t.splitn(3, "```");
    let (Some(_), Some(block), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        return t;
    };
    let block = block.trim();
    match block.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => block[4..].trim(),
        _ => block,
    }
}
