//! 运行事件：传输层（SSE / JSON 行 / 缓冲 trace）消费的有序事件流
//!
//! 线上形态：`{"type": "...", "timestamp": "...", "category": "...", "data": {...}}`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{Category, Classification};
use crate::policy::{Clarification, FinishReason, StepDescriptor};
use crate::tools::Observation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl RunEvent {
    pub fn new(payload: EventPayload, category: Option<Category>) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            category,
        }
    }

    /// 事件类型名（与线上 `type` 字段一致）
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Session { .. } => "session",
            EventPayload::Classification(_) => "classification",
            EventPayload::Step(_) => "step",
            EventPayload::Clarify(_) => "clarify",
            EventPayload::Summary(_) => "summary",
            EventPayload::Error { .. } => "error",
        }
    }

    pub fn as_step(&self) -> Option<&StepRecord> {
        match &self.payload {
            EventPayload::Step(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&RunSummary> {
        match &self.payload {
            EventPayload::Summary(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn as_clarify(&self) -> Option<&ClarifyPrompt> {
        match &self.payload {
            EventPayload::Clarify(prompt) => Some(prompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// 运行 id 公告（首个事件）
    Session { session_id: String, resumed: bool },
    Classification(Classification),
    Step(StepRecord),
    /// 运行暂停，等待用户回答
    Clarify(ClarifyPrompt),
    Summary(RunSummary),
    /// 引擎契约违背或会话存储失败
    Error { message: String },
}

/// 一次已执行步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub intent: String,
    pub tool: String,
    pub params: Value,
    pub assertion: Option<String>,
    pub finish_reason: FinishReason,
    pub final_message: Option<String>,
    pub reason: String,
    pub observation: Observation,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(index: usize, step: StepDescriptor, observation: Observation, passed: bool) -> Self {
        Self {
            index,
            intent: step.intent,
            tool: step.tool,
            params: step.params,
            assertion: step.assertion,
            finish_reason: step.finish_reason,
            final_message: step.final_message,
            reason: step.reason,
            observation,
            passed,
            timestamp: Utc::now(),
        }
    }

    /// 去掉时间戳后是否相同（比较两次运行的步骤序列）
    pub fn same_step(&self, other: &StepRecord) -> bool {
        StepRecord {
            timestamp: other.timestamp,
            ..self.clone()
        } == *other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarifyPrompt {
    pub session_id: String,
    #[serde(flatten)]
    pub question: Clarification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Resolved,
    ClassifiedOnly,
    Incomplete,
}

impl Outcome {
    /// 有终结消息即 resolved；一步未执行为 classified_only；其余 incomplete
    pub fn decide(has_final_message: bool, steps_done: usize) -> Self {
        if has_final_message {
            Outcome::Resolved
        } else if steps_done == 0 {
            Outcome::ClassifiedOnly
        } else {
            Outcome::Incomplete
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub elapsed_seconds: f64,
    pub step_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub message: String,
    pub metrics: RunMetrics,
    pub scenario: String,
    /// 续跑的运行不重新分类，此处为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

/// 未到达终结步骤时的默认总结
pub const DEFAULT_SUMMARY_MESSAGE: &str = "No further steps were taken.";
