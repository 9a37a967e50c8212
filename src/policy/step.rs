//! 步骤描述符
//!
//! StepDescriptor 由策略表产出、一经产出不再修改；编排器据此调用工具、求值断言并决定是否结束或暂停。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 澄清问题标记工具：不调用任何外部服务
pub const ASK_USER: &str = "ask_user";
/// 空操作标记工具：数据不足或分支已跳过
pub const NOOP: &str = "noop";

/// 步骤执行后的走向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Continue,
    Final,
    Escalate,
    AwaitInput,
}

impl FinishReason {
    /// final / escalate：本步之后结束运行
    pub fn is_terminal(&self) -> bool {
        matches!(self, FinishReason::Final | FinishReason::Escalate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub intent: String,
    pub tool: String,
    pub params: Value,
    pub assertion: Option<String>,
    pub finish_reason: FinishReason,
    pub final_message: Option<String>,
    pub reason: String,
}

impl StepDescriptor {
    pub fn new(intent: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        Self {
            intent: intent.into(),
            tool: tool.into(),
            params,
            assertion: None,
            finish_reason: FinishReason::Continue,
            final_message: None,
            reason: String::new(),
        }
    }

    pub fn noop(intent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(intent, NOOP, json!({})).because(reason)
    }

    /// 暂停并向用户提问
    pub fn ask(intent: impl Into<String>, question: Clarification, reason: impl Into<String>) -> Self {
        let params = serde_json::to_value(&question).unwrap_or_else(|_| json!({}));
        let mut step = Self::new(intent, ASK_USER, params).because(reason);
        step.finish_reason = FinishReason::AwaitInput;
        step
    }

    pub fn asserting(mut self, assertion: impl Into<String>) -> Self {
        self.assertion = Some(assertion.into());
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn finish(mut self, message: impl Into<String>) -> Self {
        self.finish_reason = FinishReason::Final;
        self.final_message = Some(message.into());
        self
    }

    pub fn escalate(mut self, message: impl Into<String>) -> Self {
        self.finish_reason = FinishReason::Escalate;
        self.final_message = Some(message.into());
        self
    }

    /// ask_user / noop 不产生副作用，由编排器直接合成观测结果
    pub fn is_marker(&self) -> bool {
        self.tool == ASK_USER || self.tool == NOOP
    }

    /// await_input 步骤所携带的问题
    pub fn clarification(&self) -> Option<Clarification> {
        Clarification::from_params(&self.params)
    }
}

/// 澄清问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    #[serde(alias = "questionId")]
    pub question_id: String,
    pub question: String,
    #[serde(alias = "expected", alias = "expectedType", default = "default_expected_type")]
    pub expected_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_expected_type() -> String {
    "text".to_string()
}

impl Clarification {
    pub fn new(
        question_id: impl Into<String>,
        question: impl Into<String>,
        expected_type: impl Into<String>,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            question: question.into(),
            expected_type: expected_type.into(),
            options: Vec::new(),
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// 从 params 解析；question_id 或 question 为空时返回 None
    pub fn from_params(params: &Value) -> Option<Self> {
        let q: Clarification = serde_json::from_value(params.clone()).ok()?;
        if q.question_id.trim().is_empty() || q.question.trim().is_empty() {
            return None;
        }
        Some(q)
    }
}
