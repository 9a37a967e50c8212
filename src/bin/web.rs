//! Synapse Web 传输层
//!
//! 启动: cargo run --bin synapse-web --features web
//! 监听地址取自配置 `[server] bind`（或环境变量 SYNAPSE__SERVER__BIND）。

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use synapse::config::load_config;
use synapse::core::{Answers, ResolveError, RunContext};
use synapse::engine::{ClarifyAnswer, ResolutionRun, RunEvent, RunRequest};
use synapse::tools::ToolInfo;
use synapse::{build_resolver, observability, Resolver};

struct AppState {
    resolver: Resolver,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(e: ResolveError) -> ApiError {
    let status = match &e {
        ResolveError::InvalidSession(_) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "invalid_or_expired_session"})));
        }
        ResolveError::MissingScenario => StatusCode::BAD_REQUEST,
        ResolveError::EngineContract(_) | ResolveError::Store(_) | ResolveError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message.into()})))
}

/// 查询串 / 请求体里的 JSON 文本字段
fn parse_json_field<T: serde::de::DeserializeOwned + Default>(field: &str, raw: Option<&str>) -> Result<T, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => serde_json::from_str(raw).map_err(|e| bad_request(format!("invalid {field}: {e}"))),
        None => Ok(T::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let resolver = build_resolver(&cfg).await.context("Failed to build resolver")?;
    let state = Arc::new(AppState { resolver });

    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/tools", get(api_tools_list))
        .route("/api/agent/run", get(api_agent_run))
        .route("/api/agent/resolve", post(api_agent_resolve))
        .route("/api/agent/clarify/continue", post(api_clarify_continue))
        .route("/api/agent/session/:id", delete(api_session_delete))
        .with_state(Arc::clone(&state));

    tracing::info!("Synapse Web: http://{}", cfg.server.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 把一次运行包装为 SSE：事件名即事件类型，data 为完整事件 JSON
fn sse_response(run: ResolutionRun) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = run.into_stream().map(|ev: RunEvent| {
        let data = serde_json::to_string(&ev).unwrap_or_else(|e| json!({"type": "error", "data": {"message": e.to_string()}}).to_string());
        Ok(Event::default().event(ev.kind()).data(data))
    });
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /api/tools：已注册工具目录
async fn api_tools_list(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    Json(state.resolver.invoker().catalog())
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    #[serde(default)]
    scenario: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    /// JSON 对象：问题 id -> 回答
    #[serde(default)]
    answers: Option<String>,
    /// JSON 形式的 RunContext
    #[serde(default)]
    context: Option<String>,
}

/// GET /api/agent/run：SSE 流式运行
///
/// 带 session_id 且会话存在时续跑（合并 answers）；会话不存在但给了 scenario 时以该 id 新开运行。
async fn api_agent_run(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let answers: Answers = parse_json_field("answers", q.answers.as_deref())?;
    let context: RunContext = parse_json_field("context", q.context.as_deref())?;
    let scenario = q.scenario.unwrap_or_default();
    let session_id = q.session_id.filter(|s| !s.trim().is_empty());

    let run = match session_id {
        Some(id) => match state.resolver.resume(&id, answers.clone(), None).await {
            Ok(run) => run,
            Err(ResolveError::InvalidSession(_)) if !scenario.trim().is_empty() => {
                let mut context = context;
                context.answers.merge(answers);
                state
                    .resolver
                    .start(RunRequest::new(scenario).with_context(context).with_session_id(id))
                    .map_err(api_error)?
            }
            Err(e) => return Err(api_error(e)),
        },
        None => {
            let mut context = context;
            context.answers.merge(answers);
            state
                .resolver
                .start(RunRequest::new(scenario).with_context(context))
                .map_err(api_error)?
        }
    };
    Ok(sse_response(run))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    scenario: String,
    #[serde(default)]
    context: RunContext,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /api/agent/resolve：跑完整条运行并返回缓冲的 trace
async fn api_agent_resolve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut run_req = RunRequest::new(req.scenario).with_context(req.context);
    if let Some(id) = req.session_id.filter(|s| !s.trim().is_empty()) {
        run_req = run_req.with_session_id(id);
    }
    let trace = state.resolver.resolve_sync(run_req).await.map_err(api_error)?;
    Ok(Json(json!({ "trace": trace })))
}

#[derive(Debug, Deserialize)]
struct ClarifyContinueRequest {
    session_id: String,
    question_id: String,
    #[serde(default)]
    answer: Value,
    #[serde(default)]
    expected_type: Option<String>,
}

/// POST /api/agent/clarify/continue：提交澄清回答，以 SSE 续跑
async fn api_clarify_continue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClarifyContinueRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.question_id.trim().is_empty() {
        return Err(bad_request("question_id is required"));
    }
    let run = state
        .resolver
        .continue_clarification(
            ClarifyAnswer {
                session_id: req.session_id,
                question_id: req.question_id,
                answer: req.answer,
                expected_type: req.expected_type,
            },
            None,
        )
        .await
        .map_err(api_error)?;
    Ok(sse_response(run))
}

/// DELETE /api/agent/session/:id：放弃暂停中的运行（幂等）
async fn api_session_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.resolver.abandon(&id).await.map_err(api_error)?;
    Ok(Json(json!({"status": "deleted", "session_id": id})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let (status, body) = api_error(ResolveError::InvalidSession("gone".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0["error"], "invalid_or_expired_session");

        let (status, _) = api_error(ResolveError::MissingScenario);
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_parse_json_field() {
        let answers: Answers = parse_json_field("answers", Some(r#"{"safe_drop_ok": true}"#)).unwrap();
        assert_eq!(answers.flag("safe_drop_ok"), Some(true));
        let empty: Answers = parse_json_field("answers", Some("  ")).unwrap();
        assert!(empty.is_empty());
        assert!(parse_json_field::<Answers>("answers", Some("{oops")).is_err());
    }
}
