//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；分类器与证据分析共用。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{ImageInput, LlmClient, Message, Role};

/// OpenAI 兼容客户端；单次调用受 timeout 约束，超时按失败返回
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 按 [llm] 段创建；api_key_env 指向的环境变量优先于 OPENAI_API_KEY
    pub fn from_config(section: &LlmSection) -> Self {
        let api_key = section
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        Self::new(section.base_url.as_deref(), &section.model, api_key.as_deref())
            .with_timeout(Duration::from_secs(section.timeout_secs.max(1)))
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                msg.map_err(|e| e.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let messages = self.to_openai_messages(messages)?;
        self.send(messages).await
    }

    async fn complete_with_images(&self, prompt: &str, images: &[ImageInput]) -> Result<String, String> {
        let message = vision_message(prompt, images)?;
        self.send(vec![message]).await
    }
}

impl OpenAiClient {
    async fn send(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| format!("llm request timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm usage"
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

/// 文本在前、图片在后的多段用户消息
pub fn vision_message(prompt: &str, images: &[ImageInput]) -> Result<ChatCompletionRequestMessage, String> {
    let mut parts = Vec::with_capacity(images.len() + 1);
    let text = ChatCompletionRequestMessageContentPartTextArgs::default()
        .text(prompt)
        .build()
        .map_err(|e| e.to_string())?;
    parts.push(ChatCompletionRequestUserMessageContentPart::Text(text));
    for image in images {
        let url = ImageUrlArgs::default()
            .url(image.url.clone())
            .detail(ImageDetail::High)
            .build()
            .map_err(|e| e.to_string())?;
        let part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(url)
            .build()
            .map_err(|e| e.to_string())?;
        parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(part));
    }
    ChatCompletionRequestUserMessageArgs::default()
        .content(ChatCompletionRequestUserMessageContent::Array(parts))
        .build()
        .map(ChatCompletionRequestMessage::User)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_message_carries_every_image() {
        let images = [
            ImageInput::from_bytes("image/jpeg", b"fake-jpeg"),
            ImageInput::from_url("https://cdn.example.com/box.png"),
        ];
        let message = vision_message("Is the seal broken?", &images).unwrap();
        let ChatCompletionRequestMessage::User(user) = message else {
            panic!("expected a user message");
        };
        let ChatCompletionRequestUserMessageContent::Array(parts) = user.content else {
            panic!("expected multi-part content");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], ChatCompletionRequestUserMessageContentPart::Text(_)));
        let urls: Vec<String> = parts
            .iter()
            .filter_map(|p| match p {
                ChatCompletionRequestUserMessageContentPart::ImageUrl(img) => Some(img.image_url.url.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("data:image/jpeg;base64,"));
        assert_eq!(urls[1], "https://cdn.example.com/box.png");
    }
}
