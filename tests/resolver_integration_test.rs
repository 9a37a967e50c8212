//! 编排器集成测试：桩工具 + 固定分类器

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use synapse::classify::{Category, FixedClassifier};
use synapse::core::{Answers, ResolveError, RunContext, ToolError};
use synapse::engine::{ClarifyAnswer, EventPayload, Outcome, RunEvent, RunLimits, RunRequest, StepRecord};
use synapse::policy::{StepDescriptor, StepSource};
use synapse::session::{MemorySessionStore, Session, SessionError, SessionStore};
use synapse::tools::{FlightStatusTool, Observation, Tool, ToolInvoker, ToolRegistry};
use synapse::Resolver;

/// 固定返回一段 JSON 的桩工具
struct StubTool {
    name: &'static str,
    reply: Value,
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "stub"
    }

    async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
        Ok(Observation::from_value(self.reply.clone()))
    }
}

struct FailingTool(&'static str);

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
        Err(ToolError::Upstream("service unavailable".into()))
    }
}

struct SlowTool(&'static str);

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "sleeps"
    }

    async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Observation::from_value(json!({"photos": 1})))
    }
}

/// 睡一会儿后置位标志；被中止时标志保持 false
struct LateSideEffect(&'static str, Arc<AtomicBool>);

#[async_trait]
impl Tool for LateSideEffect {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "sets a flag after a delay"
    }

    async fn invoke(&self, _params: Value) -> Result<Observation, ToolError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.1.store(true, Ordering::SeqCst);
        Ok(Observation::from_value(json!({"photos": 1})))
    }
}

/// save 总是失败的会话存储
struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    async fn save(&self, _session: Session) -> Result<(), SessionError> {
        Err(SessionError::Backend("disk full".into()))
    }

    async fn load(&self, _session_id: &str) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }

    async fn take(&self, _session_id: &str) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }

    async fn delete(&self, _session_id: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

/// 第二步给出没有终结消息的终结步骤
struct BrokenPolicy;

impl StepSource for BrokenPolicy {
    fn next_step(&self, _category: Category, step_index: usize, _ctx: &RunContext) -> Option<StepDescriptor> {
        match step_index {
            0 => Some(StepDescriptor::noop("warm up", "first step is fine")),
            1 => {
                let mut step = StepDescriptor::noop("wrap up", "terminal").finish("done");
                step.final_message = None;
                Some(step)
            }
            _ => None,
        }
    }
}

fn stub(name: &'static str, reply: Value) -> StubTool {
    StubTool { name, reply }
}

fn recipient_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(stub("contact_recipient_via_chat", json!({"messageSent": "Driver has arrived."})));
    registry.register(stub("suggest_safe_drop_off", json!({"suggested": true, "address": "Building concierge"})));
    registry.register(stub("notify_customer", json!({"delivered": true})));
    registry
}

fn damage_registry(confidence: f64) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(stub("initiate_mediation_flow", json!({"flow": "started"})));
    registry.register(stub("collect_evidence", json!({"photos": 1, "files": ["spill.jpg"]})));
    registry.register(stub(
        "analyze_evidence",
        json!({
            "status": "OK",
            "fault": "merchant",
            "confidence": confidence,
            "refund_reasonable": true,
            "packaging_feedback": "Lid not sealed."
        }),
    ));
    registry.register(stub("issue_instant_refund", json!({"refunded": true})));
    registry.register(stub("exonerate_driver", json!({"cleared": true})));
    registry.register(stub("log_merchant_packaging_feedback", json!({"feedbackLogged": true})));
    registry.register(stub("notify_customer", json!({"delivered": true})));
    registry
}

fn resolver(category: Category, registry: ToolRegistry, store: Arc<MemorySessionStore>) -> Resolver {
    Resolver::new(
        Arc::new(FixedClassifier::category(category)),
        Arc::new(ToolInvoker::new(registry, Duration::from_secs(5))),
        store,
    )
}

fn traffic_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(stub("check_traffic", json!({"status": "ok", "delayMin": 14, "durationTrafficMin": 52})));
    registry.register(stub("calculate_alternative_route", json!({"improvementMin": 9, "bestMin": 43})));
    registry.register(FlightStatusTool);
    registry.register(stub("notify_passenger_and_driver", json!({"delivered": true})));
    registry
}

fn merchant_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(stub("notify_customer", json!({"delivered": true})));
    registry.register(stub("reroute_driver", json!({"rerouted": true})));
    registry.register(stub(
        "get_nearby_merchants",
        json!({
            "count": 2,
            "merchants": [
                {"id": "m1", "name": "Cafe Quick", "lat": 12.97, "lon": 77.64},
                {"id": "m2", "name": "Dosa Point", "lat": 12.96, "lon": 77.63}
            ]
        }),
    ));
    registry
}

fn answer(session_id: &str, question_id: &str, answer: Value, expected_type: &str) -> ClarifyAnswer {
    ClarifyAnswer {
        session_id: session_id.into(),
        question_id: question_id.into(),
        answer,
        expected_type: Some(expected_type.into()),
    }
}

fn error_message(event: &RunEvent) -> Option<&str> {
    match &event.payload {
        EventPayload::Error { message } => Some(message),
        _ => None,
    }
}

fn steps(trace: &[RunEvent]) -> Vec<&StepRecord> {
    trace.iter().filter_map(RunEvent::as_step).collect()
}

fn kinds(trace: &[RunEvent]) -> Vec<&'static str> {
    trace.iter().map(RunEvent::kind).collect()
}

fn damage_context() -> RunContext {
    let mut ctx = RunContext::default();
    ctx.evidence_images = vec!["spill.jpg".into()];
    ctx.customer_token = Some("cust-token".into());
    ctx
}

#[tokio::test]
async fn test_recipient_unavailable_pauses_then_safe_drop_resolves() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::RecipientUnavailable, recipient_registry(), store.clone());

    let first = resolver
        .start(RunRequest::new("Recipient not answering the door").with_session_id("run-a"))
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&first), vec!["session", "classification", "step", "step", "clarify"]);
    let prompt = first.last().and_then(RunEvent::as_clarify).unwrap();
    assert_eq!(prompt.session_id, "run-a");
    assert_eq!(prompt.question.question_id, "safe_drop_ok");
    assert_eq!(prompt.question.expected_type, "boolean");

    let paused = store.load("run-a").await.unwrap().unwrap();
    assert_eq!(paused.steps_done, 2);
    assert_eq!(paused.category, Category::RecipientUnavailable);

    let second = resolver
        .continue_clarification(
            ClarifyAnswer {
                session_id: "run-a".into(),
                question_id: "safe_drop_ok".into(),
                answer: json!("yes"),
                expected_type: Some("boolean".into()),
            },
            None,
        )
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&second), vec!["session", "step", "summary"]);
    let step = second[1].as_step().unwrap();
    assert_eq!(step.index, 2);
    assert_eq!(step.tool, "suggest_safe_drop_off");
    assert!(step.passed);

    let summary = second.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Resolved);
    assert!(summary.message.starts_with("Safe-drop approved"));
    assert_eq!(summary.metrics.step_count, 3);
    assert!(summary.classification.is_none());

    assert!(store.load("run-a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resumed_run_matches_run_with_answers_up_front() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::RecipientUnavailable, recipient_registry(), store.clone());

    let paused = resolver.start(RunRequest::new("Nobody home")).unwrap();
    let session_id = paused.session_id().to_string();
    let paused = paused.collect().await;
    let resume_at = steps(&paused).len();

    let mut answers = Answers::new();
    answers.insert("safe_drop_ok", json!(true));
    let resumed = resolver.resume(&session_id, answers.clone(), None).await.unwrap().collect().await;

    let mut ctx = RunContext::default();
    ctx.answers = answers;
    let upfront = resolver
        .resolve_sync(RunRequest::new("Nobody home").with_context(ctx))
        .await
        .unwrap();

    let tail: Vec<_> = steps(&upfront).into_iter().filter(|s| s.index >= resume_at).collect();
    let resumed_steps = steps(&resumed);
    assert_eq!(tail.len(), resumed_steps.len());
    for (a, b) in tail.iter().zip(resumed_steps.iter()) {
        assert!(a.same_step(b), "step {} differs", a.index);
    }
    assert_eq!(
        upfront.last().and_then(RunEvent::as_summary).unwrap().message,
        resumed.last().and_then(RunEvent::as_summary).unwrap().message
    );
}

#[tokio::test]
async fn test_damage_dispute_refund_and_decline() {
    let store = Arc::new(MemorySessionStore::new());

    let confident = resolver(Category::DamageDispute, damage_registry(0.8), store.clone());
    let trace = confident
        .resolve_sync(RunRequest::new("Soup spilled all over the bag").with_context(damage_context()))
        .await
        .unwrap();
    let tools: Vec<_> = steps(&trace).iter().map(|s| s.tool.as_str()).collect();
    assert_eq!(
        tools,
        vec![
            "initiate_mediation_flow",
            "noop",
            "collect_evidence",
            "analyze_evidence",
            "issue_instant_refund",
            "exonerate_driver",
            "log_merchant_packaging_feedback",
            "notify_customer",
        ]
    );
    let summary = trace.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Resolved);
    assert_eq!(summary.metrics.step_count, 8);
    assert!(summary.classification.is_some());

    let doubtful = resolver(Category::DamageDispute, damage_registry(0.3), store.clone());
    let trace = doubtful
        .resolve_sync(RunRequest::new("Soup spilled all over the bag").with_context(damage_context()))
        .await
        .unwrap();
    let recorded = steps(&trace);
    assert_eq!(recorded.len(), 5);
    assert_eq!(recorded[4].tool, "notify_customer");
    assert!(recorded[4].final_message.is_some());
    let summary = trace.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Resolved);
    assert!(summary.message.starts_with("Refund declined"));
}

#[tokio::test]
async fn test_failing_tools_do_not_stop_the_run() {
    let mut registry = damage_registry(0.8);
    registry.register(FailingTool("collect_evidence"));
    let resolver = resolver(Category::DamageDispute, registry, Arc::new(MemorySessionStore::new()));

    let trace = resolver
        .resolve_sync(RunRequest::new("Package crushed").with_context(damage_context()))
        .await
        .unwrap();
    let recorded = steps(&trace);
    let failed = recorded.iter().find(|s| s.tool == "collect_evidence").unwrap();
    assert!(failed.observation.is_error());
    assert!(!failed.passed);
    assert!(recorded.iter().any(|s| s.tool == "analyze_evidence"));
    assert_eq!(trace.last().map(RunEvent::kind), Some("summary"));
}

#[tokio::test]
async fn test_unregistered_tool_becomes_error_step() {
    let mut registry = ToolRegistry::new();
    registry.register(stub("initiate_mediation_flow", json!({"flow": "started"})));
    let resolver = resolver(Category::DamageDispute, registry, Arc::new(MemorySessionStore::new()));

    let trace = resolver
        .resolve_sync(RunRequest::new("Box dented").with_context(damage_context()))
        .await
        .unwrap();
    let collect = steps(&trace).into_iter().find(|s| s.tool == "collect_evidence").unwrap();
    assert_eq!(collect.observation.error_message(), Some("tool_not_found:collect_evidence"));
    assert_eq!(trace.last().map(RunEvent::kind), Some("summary"));
}

#[tokio::test]
async fn test_step_budget_ends_run_incomplete() {
    let resolver = resolver(Category::DamageDispute, damage_registry(0.8), Arc::new(MemorySessionStore::new()))
        .with_limits(RunLimits {
            max_steps: 3,
            ..RunLimits::default()
        });

    let trace = resolver
        .resolve_sync(RunRequest::new("Spilled drink").with_context(damage_context()))
        .await
        .unwrap();
    assert_eq!(steps(&trace).len(), 3);
    let summary = trace.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Incomplete);
    assert_eq!(summary.metrics.step_count, 3);
}

#[tokio::test]
async fn test_time_budget_cuts_slow_tool() {
    let mut registry = damage_registry(0.8);
    registry.register(SlowTool("collect_evidence"));
    let resolver = resolver(Category::DamageDispute, registry, Arc::new(MemorySessionStore::new())).with_limits(
        RunLimits {
            max_duration: Duration::from_millis(200),
            ..RunLimits::default()
        },
    );

    let started = std::time::Instant::now();
    let trace = resolver
        .resolve_sync(RunRequest::new("Spilled drink").with_context(damage_context()))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(steps(&trace).len(), 2);
    let summary = trace.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Incomplete);
}

#[tokio::test]
async fn test_cancellation_finishes_with_summary() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::DamageDispute, damage_registry(0.8), store.clone());
    let cancel = CancellationToken::new();

    let mut run = resolver
        .start(
            RunRequest::new("Spilled drink")
                .with_context(damage_context())
                .with_cancel(cancel.clone()),
        )
        .unwrap();
    let mut seen = Vec::new();
    while let Some(event) = run.next_event().await {
        if event.as_step().is_some() {
            cancel.cancel();
        }
        seen.push(event);
    }
    assert_eq!(kinds(&seen), vec!["session", "classification", "step", "summary"]);
    let summary = seen.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Incomplete);
    assert_eq!(summary.metrics.step_count, 1);
}

#[tokio::test]
async fn test_category_without_table_is_classified_only() {
    let resolver = resolver(Category::Other, ToolRegistry::new(), Arc::new(MemorySessionStore::new()));
    let trace = resolver.resolve_sync(RunRequest::new("Something odd happened")).await.unwrap();
    assert_eq!(kinds(&trace), vec!["session", "classification", "summary"]);
    let summary = trace.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::ClassifiedOnly);
    assert_eq!(summary.message, "No further steps were taken.");
}

#[tokio::test]
async fn test_blank_scenario_and_unknown_session_are_rejected() {
    let resolver = resolver(Category::Traffic, ToolRegistry::new(), Arc::new(MemorySessionStore::new()));

    assert!(matches!(
        resolver.start(RunRequest::new("   ")),
        Err(ResolveError::MissingScenario)
    ));
    assert!(matches!(
        resolver.resume("no-such-session", Answers::new(), None).await,
        Err(ResolveError::InvalidSession(id)) if id == "no-such-session"
    ));
}

#[tokio::test]
async fn test_abandon_is_idempotent_and_invalidates_session() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::RecipientUnavailable, recipient_registry(), store.clone());

    let trace = resolver
        .start(RunRequest::new("Recipient away").with_session_id("run-x"))
        .unwrap()
        .collect()
        .await;
    assert_eq!(trace.last().map(RunEvent::kind), Some("clarify"));
    assert!(store.load("run-x").await.unwrap().is_some());

    resolver.abandon("run-x").await.unwrap();
    resolver.abandon("run-x").await.unwrap();
    assert!(store.is_empty().await);

    let result = resolver
        .continue_clarification(
            ClarifyAnswer {
                session_id: "run-x".into(),
                question_id: "safe_drop_ok".into(),
                answer: json!("yes"),
                expected_type: None,
            },
            None,
        )
        .await;
    assert!(matches!(result, Err(ResolveError::InvalidSession(_))));
}

#[tokio::test]
async fn test_declined_fallbacks_escalate() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::RecipientUnavailable, recipient_registry(), store.clone());

    let mut ctx = RunContext::default();
    ctx.answers.insert("safe_drop_ok", json!(false));
    ctx.answers.insert("locker_ok", json!(false));
    let trace = resolver
        .resolve_sync(RunRequest::new("Recipient away").with_context(ctx))
        .await
        .unwrap();
    let last_step = steps(&trace).into_iter().last().unwrap();
    assert_eq!(last_step.tool, "notify_customer");
    let summary = trace.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Resolved);
    assert!(summary.message.contains("escalated"));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_traffic_pauses_for_route_then_resolves() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::Traffic, traffic_registry(), store.clone());

    let first = resolver
        .start(RunRequest::new("Heavy traffic jam, passenger has flight AI202").with_session_id("run-t"))
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&first), vec!["session", "classification", "step", "clarify"]);
    let prompt = first.last().and_then(RunEvent::as_clarify).unwrap();
    assert_eq!(prompt.question.question_id, "route_text");
    assert_eq!(store.load("run-t").await.unwrap().unwrap().steps_done, 1);

    let second = resolver
        .continue_clarification(
            answer("run-t", "route_text", json!("origin=SRMIST Chennai, dest=Chennai International Airport"), "text"),
            None,
        )
        .await
        .unwrap()
        .collect()
        .await;
    let tools: Vec<_> = steps(&second).iter().map(|s| s.tool.as_str()).collect();
    assert_eq!(
        tools,
        vec![
            "check_traffic",
            "calculate_alternative_route",
            "check_flight_status",
            "notify_passenger_and_driver",
        ]
    );
    let traffic = steps(&second)[0];
    assert_eq!(traffic.index, 1);
    assert_eq!(traffic.params["origin_any"], "SRMIST Chennai");
    assert_eq!(traffic.params["dest_any"], "Chennai International Airport");
    assert!(traffic.passed);

    let notify = steps(&second)[3];
    assert!(notify.params["message"].as_str().unwrap().contains("AI202 is also delayed by 45 minutes"));

    let summary = second.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Resolved);
    assert_eq!(summary.metrics.step_count, 5);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_merchant_choice_by_option_number() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::MerchantCapacity, merchant_registry(), store.clone());

    let mut ctx = RunContext::default();
    ctx.origin = Some(synapse::core::GeoPoint(12.97, 77.64));
    ctx.customer_token = Some("cust-token".into());
    let first = resolver
        .start(
            RunRequest::new("Kitchen overloaded, prep time 40 minutes")
                .with_context(ctx)
                .with_session_id("run-m"),
        )
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&first), vec!["session", "classification", "step", "step", "step", "step", "clarify"]);
    let prompt = first.last().and_then(RunEvent::as_clarify).unwrap();
    assert_eq!(prompt.question.question_id, "alt_choice");
    assert_eq!(prompt.question.options.len(), 3);

    let second = resolver
        .continue_clarification(answer("run-m", "alt_choice", json!("2"), "string"), None)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&second), vec!["session", "step", "summary"]);
    let inform = second[1].as_step().unwrap();
    assert_eq!(inform.index, 4);
    assert_eq!(inform.tool, "notify_customer");
    assert_eq!(inform.params["merchant_id"], "m2");
    assert!(inform.params["message"].as_str().unwrap().contains("Dosa Point"));

    let summary = second.last().and_then(RunEvent::as_summary).unwrap();
    assert_eq!(summary.outcome, Outcome::Resolved);
    assert_eq!(summary.metrics.step_count, 5);
}

#[tokio::test]
async fn test_second_resume_of_same_session_is_rejected() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::RecipientUnavailable, recipient_registry(), store.clone());
    resolver
        .start(RunRequest::new("Nobody home").with_session_id("run-d"))
        .unwrap()
        .collect()
        .await;

    let mut answers = Answers::new();
    answers.insert("safe_drop_ok", json!(true));
    let first = resolver.resume("run-d", answers.clone(), None).await.unwrap();
    let second = resolver.resume("run-d", answers, None).await;
    assert!(matches!(second, Err(ResolveError::InvalidSession(id)) if id == "run-d"));

    let trace = first.collect().await;
    assert_eq!(trace.last().map(RunEvent::kind), Some("summary"));
}

#[tokio::test]
async fn test_contract_violation_emits_error_and_drops_session() {
    let store = Arc::new(MemorySessionStore::new());
    let stale = Session::snapshot("run-v", &RunContext::new("stale"), Category::Traffic, 0);
    store.save(stale).await.unwrap();

    let resolver = resolver(Category::Traffic, ToolRegistry::new(), store.clone()).with_policy(Arc::new(BrokenPolicy));
    let trace = resolver
        .start(RunRequest::new("Heavy traffic").with_session_id("run-v"))
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&trace), vec!["session", "classification", "step", "error"]);
    let message = trace.last().and_then(error_message).unwrap();
    assert!(message.contains("engine contract violation"), "{message}");
    assert!(trace.iter().all(|e| e.as_summary().is_none()));
    assert!(store.load("run-v").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_pause_save_reports_error_without_clarify() {
    let resolver = Resolver::new(
        Arc::new(FixedClassifier::category(Category::RecipientUnavailable)),
        Arc::new(ToolInvoker::new(recipient_registry(), Duration::from_secs(5))),
        Arc::new(BrokenStore),
    );
    let trace = resolver.resolve_sync(RunRequest::new("Recipient away")).await.unwrap();
    assert_eq!(kinds(&trace), vec!["session", "classification", "step", "step", "error"]);
    assert!(trace.last().and_then(error_message).unwrap().contains("disk full"));
    assert!(trace.iter().all(|e| e.as_clarify().is_none()));
}

#[tokio::test]
async fn test_time_budget_aborts_running_tool() {
    let fired = Arc::new(AtomicBool::new(false));
    let mut registry = damage_registry(0.8);
    registry.register(LateSideEffect("collect_evidence", fired.clone()));
    let resolver = resolver(Category::DamageDispute, registry, Arc::new(MemorySessionStore::new())).with_limits(
        RunLimits {
            max_duration: Duration::from_millis(100),
            ..RunLimits::default()
        },
    );

    let trace = resolver
        .resolve_sync(RunRequest::new("Spilled drink").with_context(damage_context()))
        .await
        .unwrap();
    assert_eq!(trace.last().map(RunEvent::kind), Some("summary"));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unclear_yes_no_answer_asks_again() {
    let store = Arc::new(MemorySessionStore::new());
    let resolver = resolver(Category::RecipientUnavailable, recipient_registry(), store.clone());
    resolver
        .start(RunRequest::new("Recipient away").with_session_id("run-q"))
        .unwrap()
        .collect()
        .await;

    let again = resolver
        .continue_clarification(answer("run-q", "safe_drop_ok", json!("maybe"), "boolean"), None)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(kinds(&again), vec!["session", "step", "clarify"]);
    assert_eq!(again[1].as_step().unwrap().index, 1);
    let prompt = again.last().and_then(RunEvent::as_clarify).unwrap();
    assert_eq!(prompt.question.question_id, "safe_drop_ok");
    assert_eq!(store.load("run-q").await.unwrap().unwrap().steps_done, 2);
}
