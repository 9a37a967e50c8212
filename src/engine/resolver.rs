//! 处置编排器
//!
//! 状态机：Announce → Classify → Stepping → {暂停（clarify）| Finishing → Done}。
//! [`ResolutionRun`] 是惰性、有限、不可重启的事件生成器：每次 `next_event` 至多执行一步，
//! 消费方取走事件后才继续下一步。同一运行内的工具调用严格串行。
//!
//! - 暂停：把快照写入 SessionStore，发出 clarify 事件，不发 summary；续跑时取出该快照；
//! - 结束（策略耗尽 / 终结步骤 / 预算用尽 / 取消）：删除会话，发出 summary；
//! - 契约违背：删除会话，发出 error 事件，不发 summary。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::assertion;
use crate::classify::{Category, Classification, Classifier};
use crate::config::{DefaultsSection, EngineSection};
use crate::core::answer::normalize;
use crate::core::{Answers, ResolveError, RunContext};
use crate::policy::{Clarification, FinishReason, PolicyEngine, StepDescriptor, StepSource, ASK_USER};
use crate::session::{Session, SessionStore};
use crate::tools::{Observation, ToolInvoker};

use super::events::{
    ClarifyPrompt, EventPayload, Outcome, RunEvent, RunMetrics, RunSummary, StepRecord, DEFAULT_SUMMARY_MESSAGE,
};

/// 单次运行的预算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunLimits {
    pub max_steps: usize,
    pub max_duration: Duration,
    /// 每个事件之间的间隔
    pub stream_delay: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::from(&EngineSection::default())
    }
}

impl From<&EngineSection> for RunLimits {
    fn from(section: &EngineSection) -> Self {
        Self {
            max_steps: section.max_steps,
            max_duration: section.max_duration(),
            stream_delay: Duration::from_millis(section.stream_delay_ms),
        }
    }
}

/// 新运行的请求
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub scenario_text: String,
    pub context: RunContext,
    /// 调用方指定的运行 id；为空时生成 uuid
    pub session_id: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl RunRequest {
    pub fn new(scenario_text: impl Into<String>) -> Self {
        Self {
            scenario_text: scenario_text.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// 对一条澄清问题的回答
#[derive(Debug, Clone)]
pub struct ClarifyAnswer {
    pub session_id: String,
    pub question_id: String,
    pub answer: Value,
    /// 未给出时按 text 处理
    pub expected_type: Option<String>,
}

#[derive(Clone)]
pub struct Resolver {
    classifier: Arc<dyn Classifier>,
    policy: Arc<dyn StepSource>,
    invoker: Arc<ToolInvoker>,
    sessions: Arc<dyn SessionStore>,
    limits: RunLimits,
    defaults: DefaultsSection,
}

impl Resolver {
    pub fn new(classifier: Arc<dyn Classifier>, invoker: Arc<ToolInvoker>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            classifier,
            policy: Arc::new(PolicyEngine::new()),
            invoker,
            sessions,
            limits: RunLimits::default(),
            defaults: DefaultsSection::default(),
        }
    }

    /// 替换内置策略表（测试或自定义流程）
    pub fn with_policy(mut self, policy: Arc<dyn StepSource>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_defaults(mut self, defaults: DefaultsSection) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }

    /// 开始一次新运行；场景文本为空时报 MissingScenario
    pub fn start(&self, req: RunRequest) -> Result<ResolutionRun, ResolveError> {
        let scenario = req.scenario_text.trim();
        if scenario.is_empty() {
            return Err(ResolveError::MissingScenario);
        }
        let mut context = req.context;
        context.scenario_text = scenario.to_string();
        context.apply_defaults(&self.defaults);
        context.absorb_route_text();

        let session_id = req
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::info!(session_id = %session_id, "run started");

        Ok(ResolutionRun::new(self.clone(), session_id, context, None, 0, req.cancel))
    }

    /// 从暂停的会话续跑；新回答合并进 context.answers
    ///
    /// 会话被取出（take），同一 id 的第二次续跑得到 InvalidSession。
    /// 回答读不出来（如布尔问题答了 "maybe"）时重问同一个问题。
    pub async fn resume(
        &self,
        session_id: &str,
        answers: Answers,
        cancel: Option<CancellationToken>,
    ) -> Result<ResolutionRun, ResolveError> {
        let session = self
            .sessions
            .take(session_id)
            .await?
            .ok_or_else(|| ResolveError::InvalidSession(session_id.to_string()))?;

        let mut context = session.context;
        context.answers.merge(answers);
        context.apply_defaults(&self.defaults);
        context.absorb_route_text();

        // 暂停点的上一步总是提问；回答仍不可用时该槽位依旧给出提问，从那里重问
        let mut steps_done = session.steps_done;
        if let Some(ask_slot) = steps_done.checked_sub(1) {
            let still_asking = self
                .policy
                .next_step(session.category, ask_slot, &context)
                .is_some_and(|step| step.finish_reason == FinishReason::AwaitInput);
            if still_asking {
                tracing::info!(session_id = %session_id, step = ask_slot, "answer not usable, asking again");
                steps_done = ask_slot;
            }
        }
        tracing::info!(
            session_id = %session_id,
            category = %session.category,
            step = steps_done,
            "run resumed"
        );

        Ok(ResolutionRun::new(
            self.clone(),
            session.session_id,
            context,
            Some(session.category),
            steps_done,
            cancel,
        ))
    }

    /// 归一化一条澄清回答并续跑
    pub async fn continue_clarification(
        &self,
        answer: ClarifyAnswer,
        cancel: Option<CancellationToken>,
    ) -> Result<ResolutionRun, ResolveError> {
        let expected = answer.expected_type.as_deref().unwrap_or("text");
        let mut answers = Answers::new();
        answers.insert(answer.question_id, normalize(answer.answer, expected));
        self.resume(&answer.session_id, answers, cancel).await
    }

    /// 放弃暂停中的运行；会话不存在也视为成功
    pub async fn abandon(&self, session_id: &str) -> Result<(), ResolveError> {
        self.sessions.delete(session_id).await?;
        tracing::info!(session_id = %session_id, "session abandoned");
        Ok(())
    }

    /// 同步执行：把整条事件流缓冲为 trace
    pub async fn resolve_sync(&self, req: RunRequest) -> Result<Vec<RunEvent>, ResolveError> {
        Ok(self.start(req)?.collect().await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Announce,
    Classify,
    Stepping,
    Finishing,
    Done,
}

/// 一次运行（新开或续跑）
pub struct ResolutionRun {
    resolver: Resolver,
    session_id: String,
    resumed: bool,
    phase: Phase,
    context: RunContext,
    category: Option<Category>,
    classification: Option<Classification>,
    steps_done: usize,
    final_message: Option<String>,
    started: Instant,
    cancel: Option<CancellationToken>,
    pending: VecDeque<RunEvent>,
    emitted: usize,
}

impl ResolutionRun {
    fn new(
        resolver: Resolver,
        session_id: String,
        context: RunContext,
        category: Option<Category>,
        steps_done: usize,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            resolver,
            session_id,
            resumed: category.is_some(),
            phase: Phase::Announce,
            context,
            category,
            classification: None,
            steps_done,
            final_message: None,
            started: Instant::now(),
            cancel,
            pending: VecDeque::new(),
            emitted: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn steps_done(&self) -> usize {
        self.steps_done
    }

    /// 下一个事件；运行结束后返回 None
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                let delay = self.resolver.limits.stream_delay;
                if self.emitted > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.emitted += 1;
                return Some(event);
            }
            match self.phase {
                Phase::Announce => self.announce(),
                Phase::Classify => self.classify().await,
                Phase::Stepping => self.step().await,
                Phase::Finishing => self.finish().await,
                Phase::Done => return None,
            }
        }
    }

    /// 以 Stream 形式消费（SSE 等）
    pub fn into_stream(self) -> impl Stream<Item = RunEvent> + Send {
        stream::unfold(self, |mut run| async move {
            let event = run.next_event().await?;
            Some((event, run))
        })
    }

    /// 跑完整条事件流
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut trace = Vec::new();
        while let Some(event) = self.next_event().await {
            trace.push(event);
        }
        trace
    }

    fn emit(&mut self, payload: EventPayload) {
        self.pending.push_back(RunEvent::new(payload, self.category));
    }

    fn announce(&mut self) {
        self.emit(EventPayload::Session {
            session_id: self.session_id.clone(),
            resumed: self.resumed,
        });
        self.phase = if self.resumed { Phase::Stepping } else { Phase::Classify };
    }

    async fn classify(&mut self) {
        let classification = self.resolver.classifier.classify(&self.context.scenario_text).await;
        tracing::info!(
            session_id = %self.session_id,
            category = %classification.category,
            uncertainty = classification.uncertainty,
            "classified"
        );
        self.category = Some(classification.category);
        self.classification = Some(classification.clone());
        self.emit(EventPayload::Classification(classification));
        self.phase = Phase::Stepping;
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }

    async fn step(&mut self) {
        let limits = self.resolver.limits;
        if self.cancelled() {
            tracing::info!(session_id = %self.session_id, step = self.steps_done, "run cancelled");
            self.phase = Phase::Finishing;
            return;
        }
        let elapsed = self.started.elapsed();
        if self.steps_done >= limits.max_steps || elapsed >= limits.max_duration {
            tracing::info!(session_id = %self.session_id, step = self.steps_done, "run budget exhausted");
            self.phase = Phase::Finishing;
            return;
        }

        let category = self.category.unwrap_or(Category::Unknown);
        let Some(descriptor) = self.resolver.policy.next_step(category, self.steps_done, &self.context) else {
            self.phase = Phase::Finishing;
            return;
        };
        if let Err(violation) = validate(&descriptor) {
            self.abort(violation).await;
            return;
        }

        let observation = if descriptor.is_marker() {
            marker_observation(&descriptor)
        } else {
            let remaining = limits.max_duration.saturating_sub(elapsed);
            let invoker = self.resolver.invoker.clone();
            // 超时即 drop invoke future，工具任务随之中止
            let result = tokio::time::timeout(remaining, invoker.invoke(&descriptor.tool, descriptor.params.clone())).await;
            match result {
                Ok(obs) => obs,
                Err(_) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        tool = %descriptor.tool,
                        "time budget ran out during tool call"
                    );
                    self.phase = Phase::Finishing;
                    return;
                }
            }
        };
        if !descriptor.is_marker() {
            ToolInvoker::fold(&descriptor.tool, &observation, &mut self.context);
        }

        let passed = assertion::settle(
            assertion::evaluate(descriptor.assertion.as_deref(), &observation),
            &observation,
        );
        tracing::info!(
            session_id = %self.session_id,
            category = %category,
            step = self.steps_done,
            tool = %descriptor.tool,
            passed,
            "step"
        );

        let finish_reason = descriptor.finish_reason;
        let final_message = descriptor.final_message.clone();
        let question = descriptor.clarification();
        self.emit(EventPayload::Step(StepRecord::new(self.steps_done, descriptor, observation, passed)));
        self.steps_done += 1;

        match finish_reason {
            FinishReason::Continue => {}
            FinishReason::Final | FinishReason::Escalate => {
                self.final_message = final_message;
                self.phase = Phase::Finishing;
            }
            FinishReason::AwaitInput => {
                let Some(question) = question else {
                    // validate 已保证 await_input 带有问题
                    self.abort("await_input step without a question".to_string()).await;
                    return;
                };
                self.pause(category, question).await;
            }
        }
    }

    async fn pause(&mut self, category: Category, question: Clarification) {
        let session = Session::snapshot(self.session_id.clone(), &self.context, category, self.steps_done);
        if let Err(e) = self.resolver.sessions.save(session).await {
            tracing::error!(session_id = %self.session_id, error = %e, "failed to persist paused run");
            self.emit(EventPayload::Error {
                message: ResolveError::from(e).to_string(),
            });
            self.phase = Phase::Done;
            return;
        }
        tracing::info!(
            session_id = %self.session_id,
            question_id = %question.question_id,
            step = self.steps_done,
            "run paused for clarification"
        );
        self.emit(EventPayload::Clarify(ClarifyPrompt {
            session_id: self.session_id.clone(),
            question,
        }));
        self.phase = Phase::Done;
    }

    async fn finish(&mut self) {
        self.discard_session().await;
        let outcome = Outcome::decide(self.final_message.is_some(), self.steps_done);
        let summary = RunSummary {
            outcome,
            message: self
                .final_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SUMMARY_MESSAGE.to_string()),
            metrics: RunMetrics {
                elapsed_seconds: self.started.elapsed().as_secs_f64(),
                step_count: self.steps_done,
            },
            scenario: self.context.scenario_text.clone(),
            classification: self.classification.clone(),
        };
        tracing::info!(session_id = %self.session_id, outcome = ?outcome, steps = self.steps_done, "run finished");
        self.emit(EventPayload::Summary(summary));
        self.phase = Phase::Done;
    }

    async fn abort(&mut self, violation: String) {
        tracing::error!(session_id = %self.session_id, step = self.steps_done, violation = %violation, "engine contract violation");
        self.discard_session().await;
        self.emit(EventPayload::Error {
            message: ResolveError::EngineContract(violation).to_string(),
        });
        self.phase = Phase::Done;
    }

    async fn discard_session(&self) {
        if let Err(e) = self.resolver.sessions.delete(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "failed to delete session");
        }
    }
}

/// 执行前校验策略产出的描述符
fn validate(step: &StepDescriptor) -> Result<(), String> {
    if step.intent.trim().is_empty() {
        return Err("step has no intent".into());
    }
    if step.tool.trim().is_empty() {
        return Err(format!("step '{}' has no tool", step.intent));
    }
    if !step.params.is_object() {
        return Err(format!("step '{}' params must be an object", step.intent));
    }
    match step.finish_reason {
        FinishReason::AwaitInput if step.clarification().is_none() => {
            Err(format!("step '{}' awaits input without question_id/question", step.intent))
        }
        FinishReason::Final | FinishReason::Escalate
            if step.final_message.as_deref().map(str::trim).unwrap_or("").is_empty() =>
        {
            Err(format!("terminal step '{}' has no final message", step.intent))
        }
        _ => Ok(()),
    }
}

/// ask_user / noop 的合成观测结果
fn marker_observation(step: &StepDescriptor) -> Observation {
    if step.tool == ASK_USER {
        let mut obs = Observation::from_value(step.params.clone());
        obs.insert("awaiting", true);
        obs
    } else {
        Observation::from_value(json!({"note": "no_operation"}))
    }
}
