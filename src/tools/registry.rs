//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / invoke），由 ToolRegistry 按名注册与查找，
//! ToolInvoker 在调用时加超时并把失败折叠为带 error 键的 Observation。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::Observation;

/// 工具 trait：名称、描述、参数 schema、异步执行（params 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（策略步骤的 tool 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；实现方应先把 params 反序列化为自己的参数结构
    async fn invoke(&self, params: Value) -> Result<Observation, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, replacing previous entry");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 按名称排序
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo params back."
        }

        async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
            Ok(Observation::from_value(params))
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        assert!(registry.contains("echo"));
        assert_eq!(registry.tool_names(), vec!["echo"]);
        let tool = registry.get("echo").unwrap();
        let obs = tool.invoke(serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(obs.get("a"), Some(&serde_json::json!(1)));
        assert!(registry.get("missing").is_none());
    }
}
