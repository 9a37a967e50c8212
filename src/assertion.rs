//! 断言求值
//!
//! 策略步骤附带一条简短断言（如 `delivered==true`、`lockers>0`、`has.prepTimeMin`），
//! 用于判断工具结果是否达成该步目标。断言先解析为 [`Predicate`]，再对 Observation 求值。
//!
//! 宽松语义：
//! - 空断言：Observation 不含 `error` / `trace` 即通过；
//! - 无法识别的断言：一律通过；
//! - 编排层再叠加 [`settle`]：断言失败但 Observation 不含 `error` 时仍视为通过。

use serde_json::Value;

use crate::tools::Observation;

/// 具名快捷断言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canned {
    ResponsePresent,
    RoutesAtLeastOne,
    CustomerAck,
    Delivered,
    Approved,
    ImprovementPositive,
    ImprovementNonNegative,
    EtaDeltaNonPositive,
    CountPositive,
    DelayNonNegative,
    NoHazard,
    Found,
    PhotosPositive,
    FlowStarted,
    Refunded,
    Cleared,
    FeedbackLogged,
    Suggested,
    StatusPresent,
    MerchantsPositive,
    LockersPositive,
    MessageSent,
}

/// 规范化断言文本中的片段 → 快捷断言；按顺序首个命中者生效
const CANNED: &[(&str, Canned)] = &[
    ("response!=none", Canned::ResponsePresent),
    ("len(routes)>=1", Canned::RoutesAtLeastOne),
    ("routes>=1", Canned::RoutesAtLeastOne),
    ("customerack==true", Canned::CustomerAck),
    ("delivered==true", Canned::Delivered),
    ("approved==true", Canned::Approved),
    ("improvementmin>0", Canned::ImprovementPositive),
    ("improvementmin>=0", Canned::ImprovementNonNegative),
    ("etadeltamin<=0", Canned::EtaDeltaNonPositive),
    ("candidates>0", Canned::CountPositive),
    ("count>0", Canned::CountPositive),
    ("delaymin>=0", Canned::DelayNonNegative),
    ("hazard==false", Canned::NoHazard),
    ("found==true", Canned::Found),
    ("photos>0", Canned::PhotosPositive),
    ("flow==started", Canned::FlowStarted),
    ("refunded==true", Canned::Refunded),
    ("cleared==true", Canned::Cleared),
    ("feedbacklogged==true", Canned::FeedbackLogged),
    ("suggested==true", Canned::Suggested),
    ("status!=none", Canned::StatusPresent),
    ("merchants>0", Canned::MerchantsPositive),
    ("lockers>0", Canned::LockersPositive),
    ("messagesent!=none", Canned::MessageSent),
];

/// 解析后的断言
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// 空断言
    NoError,
    Canned(Canned),
    /// `has.<key>`
    Has(String),
    /// `key==value`
    Equals { key: String, value: String },
    /// `key!=value`（value 为 none/null 时表示「存在且非空」）
    NotEquals { key: String, value: String },
    Unrecognized(String),
}

impl Predicate {
    /// 解析断言：去空白、转小写后按快捷表、`has.`、通用 `==` / `!=` 的顺序识别
    pub fn parse(assertion: Option<&str>) -> Self {
        let Some(raw) = assertion.map(str::trim).filter(|s| !s.is_empty()) else {
            return Predicate::NoError;
        };
        let a: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        if let Some((_, canned)) = CANNED.iter().find(|(pattern, _)| a.contains(pattern)) {
            return Predicate::Canned(*canned);
        }
        if let Some(key) = a.strip_prefix("has.") {
            return Predicate::Has(key.to_string());
        }
        if let Some((key, value)) = a.split_once("!=") {
            if !key.is_empty() && !value.contains(['<', '>', '=']) {
                return Predicate::NotEquals {
                    key: key.to_string(),
                    value: value.to_string(),
                };
            }
        }
        if let Some((key, value)) = a.split_once("==") {
            if !key.is_empty() && !a.contains(['<', '>', '!']) {
                return Predicate::Equals {
                    key: key.to_string(),
                    value: value.to_string(),
                };
            }
        }
        Predicate::Unrecognized(raw.to_string())
    }

    pub fn check(&self, obs: &Observation) -> bool {
        match self {
            Predicate::NoError => !(obs.get("error").is_some() || obs.get("trace").is_some()),
            Predicate::Canned(c) => check_canned(*c, obs),
            Predicate::Has(key) => obs.contains_key_ci(key),
            Predicate::Equals { key, value } => equals(obs.get_ci(key), value),
            Predicate::NotEquals { key, value } => {
                let current = obs.get_ci(key);
                if value == "none" || value == "null" {
                    current.map(|v| !v.is_null()).unwrap_or(false)
                } else {
                    !equals(current, value)
                }
            }
            Predicate::Unrecognized(_) => true,
        }
    }
}

/// 对 Observation 求值一条断言
pub fn evaluate(assertion: Option<&str>, obs: &Observation) -> bool {
    let predicate = Predicate::parse(assertion);
    if let Predicate::Unrecognized(ref raw) = predicate {
        tracing::debug!(assertion = %raw, "unrecognized assertion, passing");
    }
    predicate.check(obs)
}

/// 编排层覆盖：只有工具显式报错时断言失败才算失败
pub fn settle(passed: bool, obs: &Observation) -> bool {
    passed || !obs.is_error()
}

fn check_canned(canned: Canned, obs: &Observation) -> bool {
    let get = |k: &str| obs.get(k);
    match canned {
        Canned::ResponsePresent => !obs.is_empty(),
        Canned::RoutesAtLeastOne => list_len(get("routes")) >= 1,
        Canned::CustomerAck => truthy(get("customerAck")),
        Canned::Delivered => ["delivered", "driverDelivered", "passengerDelivered"]
            .iter()
            .any(|k| truthy(get(k))),
        Canned::Approved => truthy(get("approved")),
        Canned::ImprovementPositive => number(get("improvementMin")).map(|v| v > 0.0).unwrap_or(false),
        Canned::ImprovementNonNegative => number(get("improvementMin")).is_some(),
        Canned::EtaDeltaNonPositive => number(get("etaDeltaMin")).map(|v| v <= 0.0).unwrap_or(false),
        Canned::CountPositive => {
            let v = get("count").filter(|v| truthy_like(v)).or_else(|| get("candidates"));
            match v {
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Number(n)) => n.as_f64().map(|f| f > 0.0).unwrap_or(false),
                _ => false,
            }
        }
        Canned::DelayNonNegative => number(get("delayMin")).map(|v| v >= 0.0).unwrap_or(false),
        Canned::NoHazard => !truthy(get("hazard")),
        Canned::Found => truthy(get("found")),
        Canned::PhotosPositive => number(get("photos")).map(|v| v > 0.0).unwrap_or(false),
        Canned::FlowStarted => get("flow").and_then(Value::as_str) == Some("started"),
        Canned::Refunded => truthy(get("refunded")),
        Canned::Cleared => truthy(get("cleared")),
        Canned::FeedbackLogged => truthy(get("feedbackLogged")),
        Canned::Suggested => truthy(get("suggested")),
        Canned::StatusPresent => get("status").map(|v| !v.is_null()).unwrap_or(false),
        Canned::MerchantsPositive => list_len(get("merchants")) > 0,
        Canned::LockersPositive => list_len(get("lockers")) > 0,
        Canned::MessageSent => get("messageSent").map(|v| !v.is_null()).unwrap_or(false),
    }
}

/// 真值：布尔、非零数字、字符串 true/1/yes/y/ok
pub fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "y" | "ok"),
        _ => false,
    }
}

/// 非空 / 非零（决定 count 与 candidates 取哪个）
fn truthy_like(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// 只接受 JSON 数字（与字符串 "5" 区分）
fn number(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64)
}

fn list_len(v: Option<&Value>) -> usize {
    v.and_then(Value::as_array).map(Vec::len).unwrap_or(0)
}

/// 通用相等：true/false 走真值比较，其次数值比较，最后字符串比较
fn equals(current: Option<&Value>, expected: &str) -> bool {
    if expected == "true" || expected == "false" {
        return truthy(current) == (expected == "true");
    }
    let text = match current {
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(Value::Null) | None => "none".to_string(),
        Some(other) => other.to_string().to_lowercase(),
    };
    if let (Ok(a), Ok(b)) = (text.parse::<f64>(), expected.parse::<f64>()) {
        return a == b;
    }
    text == expected
}
