//! LLM 分类器
//!
//! 让模型输出严格 JSON `{kind, severity, uncertainty}`；任何失败（网络、解析、越界取值）
//! 都回退到 `Classification::fallback()` 或逐字段默认值，绝不向外抛错。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Category, Classification, Classifier, Severity};
use crate::llm::{extract_json, LlmClient, Message};

const CLASSIFY_PROMPT: &str = r#"You are Synapse, an expert last-mile logistics coordinator.

Classify the scenario into:
- kind -> one of {labels}
- severity -> one of ["low", "med", "high"]
- uncertainty -> a float between 0 and 1 (0 = fully certain, 1 = very uncertain)

Rules:
- Always choose the closest matching kind.
- traffic -> jams, accidents, closures, congestion, rerouting; also a plain trip request with origin and destination
- merchant_capacity -> restaurant/kitchen delays, prep times, backlog
- recipient_unavailable -> not home, unreachable, refuses, wrong timing
- damage_dispute -> spills, broken seals, packaging fault, who's at fault
- payment_issue -> payment failed/pending/need re-auth
- address_issue -> wrong/missing address, pin mismatch, navigation issues
- weather -> rain/thunderstorm/flood/snow/heat affecting flow
- safety -> crash, unsafe area, harassment, emergency
- other -> none of the above; use "unknown" only if text is incomprehensible

Output STRICT JSON only (no prose), e.g.:
{"kind": "traffic", "severity": "high", "uncertainty": 0.2}

Scenario:
{scenario}
"#;

/// 基于 LlmClient 的分类器
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(scenario: &str) -> String {
        let labels = Category::ALL
            .iter()
            .map(|c| format!("\"{}\"", c.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        CLASSIFY_PROMPT
            .replace("{labels}", &format!("[{labels}]"))
            .replace("{scenario}", scenario)
    }

    /// 把模型输出解析为 Classification；缺失字段按默认值补齐
    pub fn parse_reply(reply: &str) -> Classification {
        let Some(parsed) = extract_json(reply) else {
            return Classification::fallback();
        };
        let category = parsed
            .get("kind")
            .or_else(|| parsed.get("category"))
            .and_then(Value::as_str)
            .map(Category::parse)
            .unwrap_or(Category::Other);
        let severity = parsed
            .get("severity")
            .and_then(Value::as_str)
            .map(Severity::parse)
            .unwrap_or(Severity::Med);
        let uncertainty = match parsed.get("uncertainty") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.3),
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.3),
            _ => 0.3,
        };
        Classification::new(category, severity, uncertainty)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, scenario: &str) -> Classification {
        let messages = vec![Message::user(Self::prompt(scenario))];
        match self.llm.complete(&messages).await {
            Ok(reply) => {
                let c = Self::parse_reply(&reply);
                tracing::debug!(category = %c.category, uncertainty = c.uncertainty, "scenario classified");
                c
            }
            Err(e) => {
                tracing::error!(error = %e, "classifier llm call failed, using fallback");
                Classification::fallback()
            }
        }
    }
}
