//! 关键词分类器
//!
//! 不依赖 LLM 的确定性规则分类，用于离线演示、LLM 不可用时的降级以及测试。

use async_trait::async_trait;

use super::{Category, Classification, Classifier, Severity};

/// 按关键词命中顺序判定类别
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 同步分类（classify 的内部实现）
    pub fn classify_text(scenario: &str) -> Classification {
        let content = scenario.to_lowercase();
        if content.trim().is_empty() {
            return Classification::new(Category::Unknown, Severity::Med, 0.9);
        }

        let category = if Self::contains_any(&content, &["spill", "broken seal", "damaged", "leak", "crushed", "packaging"]) {
            Category::DamageDispute
        } else if Self::contains_any(&content, &["not home", "unavailable", "unreachable", "not answering", "no one at", "nobody"]) {
            Category::RecipientUnavailable
        } else if Self::contains_any(&content, &["prep time", "kitchen", "restaurant", "overloaded", "backlog", "merchant"]) {
            Category::MerchantCapacity
        } else if Self::contains_any(&content, &["payment", "card declined", "refund pending", "upi"]) {
            Category::PaymentIssue
        } else if Self::contains_any(&content, &["wrong address", "address", "pin mismatch", "cannot find the building"]) {
            Category::AddressIssue
        } else if Self::contains_any(&content, &["accident", "harass", "unsafe", "emergency", "assault"]) {
            Category::Safety
        } else if Self::contains_any(&content, &["rain", "storm", "flood", "snow", "heatwave"]) {
            Category::Weather
        } else if Self::contains_any(&content, &["traffic", "jam", "congestion", "road closed", "closure", "reroute", "airport", "flight"]) {
            Category::Traffic
        } else {
            Category::Other
        };

        let severity = if Self::contains_any(&content, &["urgent", "emergency", "flight", "asap", "immediately"]) {
            Severity::High
        } else if category == Category::Other {
            Severity::Low
        } else {
            Severity::Med
        };

        let uncertainty = if category == Category::Other { 0.6 } else { 0.2 };
        Classification::new(category, severity, uncertainty)
    }

    /// 关键词须从词首开始匹配（"rain" 命中 "raining"，不命中 "train"）
    fn contains_any(content: &str, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| {
            content.match_indices(k).any(|(i, _)| {
                content[..i]
                    .chars()
                    .next_back()
                    .map_or(true, |c| !c.is_alphanumeric())
            })
        })
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, scenario: &str) -> Classification {
        Self::classify_text(scenario)
    }
}
