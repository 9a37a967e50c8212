//! 工具观测结果
//!
//! Observation 恒为 JSON 对象；存在 `error` 键是工具失败的唯一结构信号。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observation(Map<String, Value>);

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 非对象的返回值包进 `{"result": ...}`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::default(),
            other => Self::new().with("result", other),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new().with("error", Value::String(message.into()))
    }

    pub fn error_with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::error(message).with("trace", Value::String(trace.into()))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// 大小写不敏感的键查找（精确匹配优先）
    pub fn get_ci(&self, key: &str) -> Option<&Value> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn contains_key_ci(&self, key: &str) -> bool {
        self.get_ci(key).is_some()
    }

    pub fn is_error(&self) -> bool {
        self.0.contains_key("error")
    }

    pub fn error_message(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Observation {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_signal_is_the_error_key() {
        assert!(Observation::error("boom").is_error());
        assert!(!Observation::new().with("trace", "x").is_error());
        assert!(!Observation::from_value(json!({"delivered": true})).is_error());
    }

    #[test]
    fn test_from_value_wraps_scalars() {
        assert_eq!(Observation::from_value(json!(3)).get("result"), Some(&json!(3)));
        assert!(Observation::from_value(Value::Null).is_empty());
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let obs = Observation::from_value(json!({"feedbackLogged": true}));
        assert_eq!(obs.get_ci("feedbacklogged"), Some(&json!(true)));
        assert!(obs.contains_key_ci("FEEDBACKLOGGED"));
    }
}
