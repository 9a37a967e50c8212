//! 工具调用器
//!
//! 持有 ToolRegistry 与全局超时，invoke(tool, params) 在超时内调用工具，
//! 任何失败（未注册、返回 Err、panic、超时）都折叠为带 error 键的 Observation，绝不向编排器抛错；
//! 每次调用输出结构化审计日志（JSON）。fold 按固定表把工具结果写回 RunContext。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;

use crate::assertion::truthy;
use crate::core::{Candidate, EvidenceAnalysis, RunContext};
use crate::tools::{Observation, ToolRegistry};

/// 工具目录条目（供传输层展示）
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    pub fn with_timeout_secs(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::new(registry, Duration::from_secs(timeout_secs))
    }

    /// 执行指定工具；失败一律返回 error Observation，并输出 JSON 审计日志
    pub async fn invoke(&self, tool_name: &str, params: Value) -> Observation {
        let start = Instant::now();
        let preview = params_preview(&params);

        let (observation, outcome) = match self.registry.get(tool_name) {
            None => (Observation::error(format!("tool_not_found:{tool_name}")), "not_found"),
            Some(tool) => {
                // 独立任务执行：工具 panic 只会体现为 JoinError。
                // 调用方放弃本次 invoke（运行时限耗尽、取消）时，句柄随之 drop 并中止任务。
                let mut handle = AbortOnDropHandle::new(tokio::spawn(async move { tool.invoke(params).await }));
                match tokio::time::timeout(self.timeout, &mut handle).await {
                    Ok(Ok(Ok(obs))) => (obs, "ok"),
                    Ok(Ok(Err(e))) => (Observation::error_with_trace(e.to_string(), format!("{e:?}")), "error"),
                    Ok(Err(join)) => (
                        Observation::error_with_trace(format!("tool_panicked:{tool_name}"), join.to_string()),
                        "panic",
                    ),
                    Err(_) => {
                        handle.abort();
                        (
                            Observation::error_with_trace(
                                format!("tool_timeout:{tool_name}"),
                                format!("no result within {}s", self.timeout.as_secs()),
                            ),
                            "timeout",
                        )
                    }
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": !observation.is_error(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        observation
    }

    /// 把工具结果折叠进上下文；error Observation 不折叠
    pub fn fold(tool_name: &str, obs: &Observation, ctx: &mut RunContext) {
        if obs.is_error() {
            return;
        }
        match tool_name {
            "find_nearby_locker" | "places_search_nearby" => {
                let list = obs.get("lockers").or_else(|| obs.get("places"));
                if let Some(list) = list {
                    ctx.lockers = Some(candidates(list));
                }
            }
            "get_nearby_merchants" => {
                if let Some(list) = obs.get("merchants") {
                    ctx.merchants = Some(candidates(list));
                }
            }
            "collect_evidence" => {
                if let Some(Value::Array(files)) = obs.get("files") {
                    ctx.evidence_images = files
                        .iter()
                        .filter_map(|f| f.as_str().map(String::from))
                        .collect();
                }
            }
            "analyze_evidence" => {
                if obs.get("status").map(|s| !s.is_null()).unwrap_or(false) {
                    match serde_json::from_value::<EvidenceAnalysis>(obs.clone().into_value()) {
                        Ok(analysis) => ctx.analysis = Some(analysis),
                        Err(e) => tracing::warn!(error = %e, "analysis observation not foldable"),
                    }
                }
            }
            "issue_instant_refund" => {
                ctx.refunded = Some(truthy(obs.get("refunded")));
            }
            "check_flight_status" => {
                ctx.flight_status = Some(obs.clone().into_value());
            }
            "check_traffic" => {
                ctx.extra.insert("traffic".to_string(), obs.clone().into_value());
            }
            "calculate_alternative_route" => {
                ctx.extra.insert("best_route".to_string(), obs.clone().into_value());
            }
            "check_weather" => {
                ctx.extra.insert("weather".to_string(), obs.clone().into_value());
            }
            "air_quality" => {
                ctx.extra.insert("air_quality".to_string(), obs.clone().into_value());
            }
            _ => {}
        }
    }

    /// 已注册工具的目录（按名称排序）
    pub fn catalog(&self) -> Vec<ToolInfo> {
        self.registry
            .tool_names()
            .into_iter()
            .filter_map(|name| self.registry.get(&name))
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.parameters_schema(),
            })
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

/// 宽松解析候选列表：单条解析失败只跳过该条
fn candidates(list: &Value) -> Vec<Candidate> {
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<Candidate>(item.clone()).ok())
                .filter(|c| !c.id.is_empty() || !c.name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn params_preview(params: &Value) -> String {
    let s = params.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(&'static str, Result<Value, &'static str>);

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "fixed reply"
        }

        async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
            match &self.1 {
                Ok(v) => Ok(Observation::from_value(v.clone())),
                Err(msg) => Err(ToolError::Upstream(msg.to_string())),
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never returns in time"
        }

        async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Observation::new())
        }
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn description(&self) -> &str {
            "panics"
        }

        async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
            panic!("tool bug")
        }
    }

    fn invoker() -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(Fixed("ok_tool", Ok(json!({"delivered": true}))));
        registry.register(Fixed("bad_tool", Err("503 from upstream")));
        registry.register(Slow);
        registry.register(Panics);
        ToolInvoker::new(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_observation() {
        let obs = invoker().invoke("nope", json!({})).await;
        assert_eq!(obs.error_message(), Some("tool_not_found:nope"));
    }

    #[tokio::test]
    async fn test_failures_never_escape() {
        let inv = invoker();
        let obs = inv.invoke("bad_tool", json!({})).await;
        assert!(obs.error_message().unwrap().contains("503 from upstream"));
        assert!(obs.get("trace").is_some());

        let obs = inv.invoke("slow", json!({})).await;
        assert_eq!(obs.error_message(), Some("tool_timeout:slow"));

        let obs = inv.invoke("panics", json!({})).await;
        assert_eq!(obs.error_message(), Some("tool_panicked:panics"));

        let obs = inv.invoke("ok_tool", json!({})).await;
        assert!(!obs.is_error());
    }

    struct SideEffect(Arc<std::sync::atomic::AtomicBool>);

    #[async_trait]
    impl Tool for SideEffect {
        fn name(&self) -> &str {
            "side_effect"
        }

        fn description(&self) -> &str {
            "sets a flag after a delay"
        }

        async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Observation::new())
        }
    }

    #[tokio::test]
    async fn test_dropped_invoke_aborts_tool_task() {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(SideEffect(fired.clone()));
        let inv = ToolInvoker::new(registry, Duration::from_secs(5));

        let outer = tokio::time::timeout(Duration::from_millis(20), inv.invoke("side_effect", json!({}))).await;
        assert!(outer.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_fold_table() {
        let mut ctx = RunContext::new("x");
        ToolInvoker::fold(
            "places_search_nearby",
            &Observation::from_value(json!({"count": 1, "places": [{"id": "p1", "name": "Post Office", "lng": 77.1}]})),
            &mut ctx,
        );
        let lockers = ctx.lockers.clone().unwrap();
        assert_eq!(lockers[0].name, "Post Office");
        assert_eq!(lockers[0].lon, Some(77.1));

        ToolInvoker::fold(
            "analyze_evidence",
            &Observation::from_value(json!({"status": "OK", "fault": "merchant", "confidence": 0.8, "refund_reasonable": true})),
            &mut ctx,
        );
        assert!(ctx.analysis.as_ref().unwrap().refund_reasonable);

        ToolInvoker::fold("issue_instant_refund", &Observation::from_value(json!({"refunded": true})), &mut ctx);
        assert_eq!(ctx.refunded, Some(true));

        ToolInvoker::fold("collect_evidence", &Observation::from_value(json!({"files": ["a.jpg"]})), &mut ctx);
        assert_eq!(ctx.evidence_images, vec!["a.jpg"]);

        ToolInvoker::fold("check_traffic", &Observation::from_value(json!({"delayMin": 12})), &mut ctx);
        assert_eq!(ctx.extra["traffic"]["delayMin"], 12);

        ToolInvoker::fold("check_weather", &Observation::from_value(json!({"shortText": "Heavy rain"})), &mut ctx);
        assert_eq!(ctx.extra["weather"]["shortText"], "Heavy rain");
    }

    #[test]
    fn test_error_observations_are_not_folded() {
        let mut ctx = RunContext::new("x");
        ToolInvoker::fold(
            "get_nearby_merchants",
            &Observation::from_value(json!({"merchants": [{"id": "m"}], "error": "partial"})),
            &mut ctx,
        );
        assert!(ctx.merchants.is_none());
    }

    #[test]
    fn test_catalog_is_sorted() {
        let names: Vec<String> = invoker().catalog().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["bad_tool", "ok_tool", "panics", "slow"]);
    }
}
