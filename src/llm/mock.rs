//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序回放预置回复；回复用尽后返回 Err，便于测试分类器与证据分析的降级路径。
//! 带图片的请求会被记录下来，测试可据此检查图片是否真的交给了模型。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ImageInput, LlmClient, Message};

/// Mock 客户端：依次返回脚本中的回复
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    vision_requests: Mutex<Vec<(String, Vec<ImageInput>)>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    pub fn with_error(self, error: impl Into<String>) -> Self {
        self.push(Err(error.into()));
        self
    }

    /// 已收到的 (提示词, 图片) 请求
    pub fn vision_requests(&self) -> Vec<(String, Vec<ImageInput>)> {
        self.vision_requests.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> Result<String, String> {
        let next = self.replies.lock().map_err(|e| e.to_string())?.pop_front();
        next.unwrap_or_else(|| Err("mock: no scripted reply".to_string()))
    }

    fn push(&self, item: Result<String, String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(item);
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.next_reply()
    }

    async fn complete_with_images(&self, prompt: &str, images: &[ImageInput]) -> Result<String, String> {
        if let Ok(mut seen) = self.vision_requests.lock() {
            seen.push((prompt.to_string(), images.to_vec()));
        }
        self.next_reply()
    }
}
