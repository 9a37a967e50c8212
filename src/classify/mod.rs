//! 场景分类
//!
//! Classifier 把场景文本映射为 Classification（类别 / 严重度 / 不确定度）。
//! 分类失败不向上传播：实现方必须回退为 `Classification::fallback()`。

pub mod keyword;
pub mod llm;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use keyword::KeywordClassifier;
pub use llm::LlmClassifier;

/// 场景类别（封闭集合，决定由哪张策略表驱动运行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Traffic,
    MerchantCapacity,
    RecipientUnavailable,
    DamageDispute,
    PaymentIssue,
    AddressIssue,
    Weather,
    Safety,
    Other,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::MerchantCapacity,
        Category::RecipientUnavailable,
        Category::Traffic,
        Category::DamageDispute,
        Category::PaymentIssue,
        Category::AddressIssue,
        Category::Weather,
        Category::Safety,
        Category::Other,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Traffic => "traffic",
            Category::MerchantCapacity => "merchant_capacity",
            Category::RecipientUnavailable => "recipient_unavailable",
            Category::DamageDispute => "damage_dispute",
            Category::PaymentIssue => "payment_issue",
            Category::AddressIssue => "address_issue",
            Category::Weather => "weather",
            Category::Safety => "safety",
            Category::Other => "other",
            Category::Unknown => "unknown",
        }
    }

    /// 解析类别名；集合外的值一律归为 Other
    pub fn parse(s: &str) -> Self {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Med,
    High,
}

impl Severity {
    /// 未知取值归为 Med
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            _ => Severity::Med,
        }
    }
}

/// 分类结果，始终结构完整
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub severity: Severity,
    /// 0 = 完全确定，1 = 非常不确定
    pub uncertainty: f64,
}

impl Classification {
    pub fn new(category: Category, severity: Severity, uncertainty: f64) -> Self {
        let uncertainty = if uncertainty.is_finite() {
            uncertainty.clamp(0.0, 1.0)
        } else {
            0.3
        };
        Self {
            category,
            severity,
            uncertainty,
        }
    }

    /// 分类器内部失败时的替代结果
    pub fn fallback() -> Self {
        Self::new(Category::Other, Severity::Med, 0.3)
    }
}

/// 分类器接口：不得向外抛错
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, scenario: &str) -> Classification;
}

/// 固定返回同一分类（测试与回放用）
#[derive(Debug, Clone)]
pub struct FixedClassifier(pub Classification);

impl FixedClassifier {
    pub fn category(category: Category) -> Self {
        Self(Classification::new(category, Severity::Med, 0.1))
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _scenario: &str) -> Classification {
        self.0.clone()
    }
}
