//! 运行上下文（RunContext）
//!
//! 一次处置运行内贯穿始终的结构化状态：初始输入（坐标、地名、推送令牌、实体 id）、
//! 工具产出的累积结果（候选储物柜、候选商家、证据分析）、以及用户按问题 id 给出的回答。
//! 暂停时整个上下文被序列化进 Session，因此所有字段必须始终可序列化。

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DefaultsSection;

/// 经纬度点，序列化为 `[lat, lon]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint(pub f64, pub f64);

impl GeoPoint {
    pub fn lat(&self) -> f64 {
        self.0
    }

    pub fn lon(&self) -> f64 {
        self.1
    }

    /// 解析 "lat,lon" 形式的字符串
    pub fn parse(s: &str) -> Option<Self> {
        let (lat, lon) = s.split_once(',')?;
        let lat = lat.trim().parse::<f64>().ok()?;
        let lon = lon.trim().parse::<f64>().ok()?;
        Some(GeoPoint(lat, lon))
    }
}

/// 候选地点（储物柜、替代商家等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Candidate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, alias = "lng", skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

/// 证据分析结论（analyze_evidence 的产出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAnalysis {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fault: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub refund_reasonable: bool,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub packaging_feedback: Option<String>,
}

impl Default for EvidenceAnalysis {
    fn default() -> Self {
        Self {
            status: "NO_EVIDENCE".to_string(),
            fault: None,
            confidence: 0.0,
            refund_reasonable: false,
            rationale: None,
            packaging_feedback: None,
        }
    }
}

/// 用户回答：问题 id -> 原始 JSON 值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Answers(BTreeMap<String, Value>);

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, question_id: impl Into<String>, value: Value) {
        self.0.insert(question_id.into(), value);
    }

    /// 合并另一批回答，同名问题以新值为准
    pub fn merge(&mut self, other: Answers) {
        self.0.extend(other.0);
    }

    /// 取回答；null、空白、"null"、"none" 视为未回答
    pub fn get(&self, question_id: &str) -> Option<&Value> {
        self.0.get(question_id).filter(|v| !is_blank(v))
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        self.get(question_id).is_some()
    }

    pub fn text(&self, question_id: &str) -> Option<&str> {
        self.get(question_id)?.as_str().map(str::trim)
    }

    /// 三态布尔：yes/true/1 → Some(true)，no/false/0 → Some(false)，其它 → None
    pub fn flag(&self, question_id: &str) -> Option<bool> {
        match self.get(question_id)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => Some(true),
                "n" | "no" | "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// 回答为字符串列表（证据图片等）
    pub fn list(&self, question_id: &str) -> Vec<String> {
        match self.get(question_id) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Answers {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Answers(iter.into_iter().collect())
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "" | "null" | "none"),
        _ => false,
    }
}

/// 一次运行的结构化上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunContext {
    pub scenario_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_place: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_place: Option<String>,
    /// 出行方式（DRIVE / TWO_WHEELER / WALK / BICYCLE / TRANSIT）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passenger_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    /// 已检索到的储物柜；None 表示尚未检索
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockers: Option<Vec<Candidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchants: Option<Vec<Candidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<EvidenceAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_status: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evidence_images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_notes: Option<String>,

    pub answers: Answers,

    /// 尚未提升为一等字段的工具暂存数据
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn new(scenario_text: impl Into<String>) -> Self {
        Self {
            scenario_text: scenario_text.into(),
            ..Default::default()
        }
    }

    /// 未显式提供的推送令牌用配置中的默认值补齐
    pub fn apply_defaults(&mut self, defaults: &DefaultsSection) {
        fill(&mut self.customer_token, &defaults.customer_token);
        fill(&mut self.driver_token, &defaults.driver_token);
        fill(&mut self.passenger_token, &defaults.passenger_token);
    }

    /// 起点地名（排除 "lat,lon" 形式的字符串）
    pub fn origin_name(&self) -> Option<&str> {
        self.origin_place.as_deref().and_then(only_place_name)
    }

    pub fn dest_name(&self) -> Option<&str> {
        self.dest_place.as_deref().and_then(only_place_name)
    }

    /// 起点优先的坐标（商家场景：司机当前位置）
    pub fn origin_or_dest(&self) -> Option<GeoPoint> {
        self.origin.or(self.dest)
    }

    /// 终点优先的坐标（收件人场景：投递地址）
    pub fn dest_or_origin(&self) -> Option<GeoPoint> {
        self.dest.or(self.origin)
    }

    /// 证据图片：工具已收集的优先，其次是用户上传回答
    pub fn evidence(&self) -> Vec<String> {
        if !self.evidence_images.is_empty() {
            return self.evidence_images.clone();
        }
        self.answers.list("evidence_images")
    }

    pub fn notes(&self) -> Option<String> {
        self.evidence_notes
            .clone()
            .or_else(|| self.answers.text("evidence_notes").map(String::from))
    }

    /// 将 route_text 回答（"origin=A, dest=B" 或 "A to B"）折叠进地名字段；已有地名时不覆盖
    pub fn absorb_route_text(&mut self) {
        let Some(text) = self.answers.text("route_text").map(String::from) else {
            return;
        };
        if self.origin_name().is_some() && self.dest_name().is_some() {
            return;
        }
        if let Some((origin, dest)) = parse_route_text(&text) {
            if self.origin_name().is_none() {
                self.origin_place = Some(origin);
            }
            if self.dest_name().is_none() {
                self.dest_place = Some(dest);
            }
        }
    }
}

fn fill(slot: &mut Option<String>, default: &Option<String>) {
    let missing = slot.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true);
    if missing {
        if let Some(d) = default.as_deref().filter(|d| !d.trim().is_empty()) {
            *slot = Some(d.to_string());
        }
    }
}

/// 仅接受可读地名：空白或 "lat,lon" 形状的字符串返回 None
pub fn only_place_name(s: &str) -> Option<&str> {
    let t = s.trim();
    if t.is_empty() || GeoPoint::parse(t).is_some() {
        None
    } else {
        Some(t)
    }
}

static KEYED_ROUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)origin\s*=\s*(.+?)\s*,\s*dest(?:ination)?\s*=\s*(.+)").unwrap());

static PLAIN_ROUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:from\s+)?(.+?)\s+to\s+(.+?)\s*$").unwrap());

/// 从自由文本中解析起终点地名
pub fn parse_route_text(text: &str) -> Option<(String, String)> {
    let caps = KEYED_ROUTE_RE.captures(text).or_else(|| PLAIN_ROUTE_RE.captures(text))?;
    let clean = |s: &str| s.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.').trim().to_string();
    let origin = clean(caps.get(1)?.as_str());
    let dest = clean(caps.get(2)?.as_str());
    if origin.is_empty() || dest.is_empty() {
        return None;
    }
    Some((origin, dest))
}
