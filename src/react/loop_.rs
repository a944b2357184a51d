//! 推理主循环
//!
//! 查询 LLM → 最终回复则结束；工具调用则追加 assistant 消息、校验并并发执行、按请求顺序追加 tool 消息，
//! 再进入下一次查询。最多 max_steps 次查询；支持整轮截止时间与取消。
//! 可选 event_tx：向 Web 等前端推送 StepUpdate / ToolCall / Observation / MessageChunk / MessageDone。

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine, TurnPhase};
use crate::llm::{LlmReply, RequestUsage, ToolSpec};
use crate::memory::{Message, Session};
use crate::react::{
    normalize_call_ids, AssistantReply, Planner, ReactEvent, ReplyStatus, ToolCallSummary,
};
use crate::tools::{ToolExecutor, ToolOutcome, ToolSet};

/// 默认每轮最多 LLM 查询次数
pub const DEFAULT_MAX_STEPS: usize = 8;
/// 流式回复时每段字符数
const CHUNK_CHARS: usize = 24;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

const TIMED_OUT_TEXT: &str = "Sorry, this request took too long to complete. Please try again.";
const CANCELLED_TEXT: &str = "The request was cancelled before it finished.";

/// 一轮推理所需的组件与限制
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub cancel_token: CancellationToken,
    pub max_steps: usize,
    /// 整轮截止时间；None 表示不限
    pub deadline: Option<Instant>,
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            cancel_token,
            max_steps: DEFAULT_MAX_STEPS,
            deadline: None,
            event_tx: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// 从现在起 timeout 之后截止
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 剩余时间；已过截止时间返回 None
    fn remaining(&self) -> Option<Duration> {
        match self.deadline {
            None => Some(Duration::MAX),
            Some(d) => d.checked_duration_since(Instant::now()).filter(|r| !r.is_zero()),
        }
    }
}

/// LLM 查询未产生回复的原因
enum Interrupt {
    Cancelled,
    TimedOut,
    Fatal { error: AgentError, text: String },
}

/// 单轮内的状态与统计
struct Turn<'s, 'a> {
    session: &'s ReactSession<'a>,
    phase: TurnPhase,
    steps: usize,
    tool_calls: Vec<ToolCallSummary>,
    /// 本轮各次请求自身报告的用量之和，不受并发会话影响
    usage: RequestUsage,
}

impl<'s, 'a> Turn<'s, 'a> {
    fn new(session: &'s ReactSession<'a>) -> Self {
        Self {
            session,
            phase: TurnPhase::AwaitingLlm,
            steps: 0,
            tool_calls: Vec::new(),
            usage: RequestUsage::default(),
        }
    }

    fn cancelled(self) -> AssistantReply {
        let error = Some(AgentError::Cancelled.to_string());
        self.finish(TurnPhase::Cancelled, ReplyStatus::Cancelled, CANCELLED_TEXT.into(), error)
    }

    fn timed_out(self) -> AssistantReply {
        self.finish(TurnPhase::TimedOut, ReplyStatus::TimedOut, TIMED_OUT_TEXT.into(), None)
    }

    fn transition(&mut self, next: TurnPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(from = ?self.phase, to = ?next, "unexpected turn transition");
        }
        tracing::debug!(from = ?self.phase, to = ?next, step = self.steps, "turn transition");
        self.phase = next;
        self.session.send(ReactEvent::Phase { phase: next });
    }

    fn finish(
        mut self,
        phase: TurnPhase,
        status: ReplyStatus,
        message: String,
        error: Option<String>,
    ) -> AssistantReply {
        self.transition(phase);
        let (_, _, cumulative_total) = self.session.planner.token_usage();
        self.session.send(ReactEvent::TokenUsage {
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            total_tokens: self.usage.total(),
            cumulative_total,
        });
        if let Some(e) = &error {
            self.session.send(ReactEvent::Error { text: e.clone() });
        }
        AssistantReply {
            message,
            status,
            steps: self.steps,
            tool_calls: self.tool_calls,
            usage: self.usage,
            error,
        }
    }
}

/// 执行一轮推理；调用方需持有该会话的独占锁，用户消息已追加
pub async fn react_loop(
    session: &ReactSession<'_>,
    conversation: &mut Session,
    tools: &ToolSet,
) -> AssistantReply {
    let specs = tools.specs();
    let mut turn = Turn::new(session);

    loop {
        if session.cancel_token.is_cancelled() {
            return turn.cancelled();
        }
        if session.remaining().is_none() {
            return turn.timed_out();
        }

        turn.steps += 1;
        let step = turn.steps;
        session.send(ReactEvent::StepUpdate {
            step,
            max_steps: session.max_steps,
        });
        session.send(ReactEvent::Thinking);

        let reply = match query_llm(session, conversation.messages(), &specs).await {
            Ok((reply, usage)) => {
                turn.usage += usage;
                reply
            }
            Err(Interrupt::Cancelled) => return turn.cancelled(),
            Err(Interrupt::TimedOut) => return turn.timed_out(),
            Err(Interrupt::Fatal { error, text }) => {
                tracing::warn!(session = %conversation.id(), step, error = %error, "turn failed");
                let error = Some(error.to_string());
                return turn.finish(TurnPhase::Fatal, ReplyStatus::Failed, text, error);
            }
        };

        match reply {
            LlmReply::Final(text) => {
                turn.transition(TurnPhase::FinalAnswer);
                conversation.append(Message::assistant(text.clone()));
                let chars: Vec<char> = text.chars().collect();
                for chunk in chars.chunks(CHUNK_CHARS) {
                    session.send(ReactEvent::MessageChunk {
                        text: chunk.iter().collect(),
                    });
                }
                session.send(ReactEvent::MessageDone);
                return turn.finish(TurnPhase::Done, ReplyStatus::Completed, text, None);
            }
            LlmReply::ToolCalls { content, calls } => {
                turn.transition(TurnPhase::ToolCallsRequested);
                if !content.trim().is_empty() {
                    session.send(ReactEvent::ThinkingContent {
                        text: content.clone(),
                    });
                }
                let calls = normalize_call_ids(step, calls);
                conversation.append(Message::assistant_tool_calls(content, calls.clone()));
                for call in &calls {
                    session.send(ReactEvent::ToolCall {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        args: call.arguments.clone(),
                    });
                }

                turn.transition(TurnPhase::AwaitingToolResults);
                // 已派发的调用总会完成（各自带超时），结果全部写回后再检查取消
                let results = session.executor.execute_batch(tools, &calls).await;
                for result in results {
                    match &result.outcome {
                        ToolOutcome::Success { .. } => session.send(ReactEvent::Observation {
                            call_id: result.call_id.clone(),
                            tool: result.tool_name.clone(),
                            preview: preview(&result.render()),
                        }),
                        ToolOutcome::Failure { kind, message } => {
                            session.send(ReactEvent::ToolFailure {
                                call_id: result.call_id.clone(),
                                tool: result.tool_name.clone(),
                                kind: *kind,
                                reason: message.clone(),
                            })
                        }
                    }
                    turn.tool_calls.push(ToolCallSummary::from(&result));
                    conversation.append(Message::tool(result));
                }

                if step >= session.max_steps {
                    let err = Some(AgentError::StepLimitExceeded(session.max_steps).to_string());
                    tracing::warn!(
                        session = %conversation.id(),
                        max_steps = session.max_steps,
                        "step limit reached"
                    );
                    let text = step_limit_text(session.max_steps);
                    conversation.append(Message::assistant(text.clone()));
                    return turn.finish(
                        TurnPhase::StepLimitExceeded,
                        ReplyStatus::StepLimitExceeded,
                        text,
                        err,
                    );
                }
                turn.transition(TurnPhase::AwaitingLlm);
            }
        }
    }
}

/// 查询 LLM；暂时性错误按 RecoveryEngine 的建议在同一步内重试
async fn query_llm(
    session: &ReactSession<'_>,
    messages: &[Message],
    specs: &[ToolSpec],
) -> Result<(LlmReply, RequestUsage), Interrupt> {
    let mut attempt = 0;
    loop {
        let Some(budget) = session.remaining() else {
            return Err(Interrupt::TimedOut);
        };
        let result = tokio::select! {
            _ = session.cancel_token.cancelled() => return Err(Interrupt::Cancelled),
            r = session.planner.plan(messages, specs, budget) => r,
        };
        let err = match result {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };
        if session.remaining().is_none() {
            return Err(Interrupt::TimedOut);
        }

        attempt += 1;
        match session.recovery.handle(&err, attempt) {
            RecoveryAction::Retry(delay) => {
                tracing::warn!(
                    error = %err,
                    attempt,
                    "llm request failed, retrying after {:?}",
                    delay
                );
                session.send(ReactEvent::Recovery {
                    action: "retry".to_string(),
                    detail: err.to_string(),
                });
                tokio::select! {
                    _ = session.cancel_token.cancelled() => return Err(Interrupt::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            RecoveryAction::Abort(text) => {
                session.send(ReactEvent::Recovery {
                    action: "abort".to_string(),
                    detail: err.to_string(),
                });
                return Err(Interrupt::Fatal {
                    error: AgentError::Oracle(err),
                    text,
                });
            }
        }
    }
}

fn step_limit_text(max_steps: usize) -> String {
    format!(
        "I could not finish within the limit of {max_steps} reasoning steps. \
         The tool results gathered so far are in the conversation; \
         please narrow the question or ask me to continue."
    )
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::llm::ScriptedLlmClient;
    use crate::mcp::{McpError, McpToolSchema, ToolServer};
    use crate::memory::Role;
    use crate::tools::{ToolCallRequest, ToolRegistry};

    struct StaticServer;

    #[async_trait]
    impl ToolServer for StaticServer {
        async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
            Ok(vec![McpToolSchema {
                name: "query_metric".into(),
                description: None,
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, McpError> {
            Ok(json!({"cpu": 42}))
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    async fn fixture(script: Vec<LlmReply>) -> (Planner, ToolExecutor, Arc<ToolSet>) {
        let server: Arc<dyn ToolServer> = Arc::new(StaticServer);
        let registry = Arc::new(ToolRegistry::new(server, Duration::from_secs(5)));
        let set = registry.refresh().await.unwrap();
        let llm = Arc::new(ScriptedLlmClient::new(script.into_iter().map(Ok)));
        let planner = Planner::new(llm, "sys", Duration::from_secs(5));
        (planner, ToolExecutor::new(registry, 2), set)
    }

    fn metric_call() -> LlmReply {
        LlmReply::ToolCalls {
            content: "checking".into(),
            calls: vec![ToolCallRequest::new("", "query_metric", json!({}))],
        }
    }

    #[tokio::test]
    async fn test_events_follow_the_turn() {
        let script = vec![metric_call(), LlmReply::Final("42%".into())];
        let (planner, executor, set) = fixture(script).await;
        let recovery = RecoveryEngine::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ReactSession::new(&planner, &executor, &recovery, CancellationToken::new())
            .with_event_tx(&tx);
        let mut conversation = Session::new("s");
        conversation.append(Message::user("cpu?"));

        let reply = react_loop(&session, &mut conversation, &set).await;
        assert_eq!(reply.status, ReplyStatus::Completed);
        // 空 ID 被替换为 call_{step}_{index}
        assert_eq!(reply.tool_calls[0].call_id, "call_1_0");
        drop(session);
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            let v = serde_json::to_value(&ev).unwrap();
            kinds.push(v["type"].as_str().unwrap().to_string());
        }
        let expected_kinds = [
            "step_update",
            "thinking_content",
            "tool_call",
            "observation",
            "message_chunk",
            "message_done",
            "token_usage",
        ];
        for expected in expected_kinds {
            assert!(kinds.iter().any(|k| k == expected), "missing {expected} in {kinds:?}");
        }
        assert_eq!(kinds.last().map(String::as_str), Some("token_usage"));
    }

    #[tokio::test]
    async fn test_step_limit_appends_explanation() {
        let (planner, executor, set) = fixture(vec![metric_call(), metric_call()]).await;
        let recovery = RecoveryEngine::default();
        let session = ReactSession::new(&planner, &executor, &recovery, CancellationToken::new())
            .with_max_steps(2);
        let mut conversation = Session::new("s");
        conversation.append(Message::user("cpu?"));

        let reply = react_loop(&session, &mut conversation, &set).await;
        assert_eq!(reply.status, ReplyStatus::StepLimitExceeded);
        assert_eq!(reply.steps, 2);
        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::Tool,
                Role::Assistant
            ]
        );
        assert_eq!(conversation.messages().last().unwrap().content, reply.message);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_appends_nothing() {
        let (planner, executor, set) = fixture(vec![LlmReply::Final("unused".into())]).await;
        let recovery = RecoveryEngine::default();
        let token = CancellationToken::new();
        token.cancel();
        let session = ReactSession::new(&planner, &executor, &recovery, token);
        let mut conversation = Session::new("s");
        conversation.append(Message::user("hi"));

        let reply = react_loop(&session, &mut conversation, &set).await;
        assert_eq!(reply.status, ReplyStatus::Cancelled);
        assert_eq!(reply.steps, 0);
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_usage_sums_this_turns_requests() {
        let (_, executor, set) = fixture(Vec::new()).await;
        let llm = Arc::new(
            ScriptedLlmClient::new(vec![Ok(metric_call()), Ok(LlmReply::Final("42%".into()))])
                .with_usage(7, 2),
        );
        let planner = Planner::new(llm, "sys", Duration::from_secs(5));
        let recovery = RecoveryEngine::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ReactSession::new(&planner, &executor, &recovery, CancellationToken::new())
            .with_event_tx(&tx);
        let mut conversation = Session::new("s");
        conversation.append(Message::user("cpu?"));

        let reply = react_loop(&session, &mut conversation, &set).await;
        assert_eq!(reply.usage, RequestUsage::new(14, 4));
        drop(session);
        drop(tx);

        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(serde_json::to_value(&ev).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last["type"], "token_usage");
        assert_eq!(last["total_tokens"], 18);
        assert_eq!(last["cumulative_total"], 18);
    }
}
