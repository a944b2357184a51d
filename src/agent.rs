//! Agent 运行时
//!
//! 供 REPL 与 HTTP 前端调用：handle_turn 对某个会话跑一轮推理并返回 AssistantReply。
//! 同一会话的轮次按到达顺序串行，不同会话完全并行；每轮使用同一个工具集快照，
//! 结束后（仍持有会话锁）按保留策略裁剪历史。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{create_llm_client, LlmClient};
use crate::mcp::{McpClient, ToolServer};
use crate::memory::{Message, RetentionPolicy, SessionMemory};
use crate::react::{react_loop, AssistantReply, Planner, ReactEvent, ReactSession};
use crate::tools::{ToolExecutor, ToolRegistry, ToolSet};

/// 健康状态（不发起网络请求）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub registry_loaded: bool,
    pub registry_stale: bool,
    pub tool_count: usize,
    pub mcp_connected: bool,
    /// MCP 服务端在握手中报告的名称
    pub mcp_server: Option<String>,
}

/// 对话 Agent：Planner + 工具执行器 + 会话记忆，可被多个前端任务共享（Arc<Agent>）
pub struct Agent {
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    memory: Arc<SessionMemory>,
    retention: RetentionPolicy,
    max_steps: usize,
    turn_timeout: Duration,
}

impl Agent {
    /// 用给定的 LLM 与工具服务端组装 Agent；其余参数取自配置
    pub fn new(llm: Arc<dyn LlmClient>, server: Arc<dyn ToolServer>, cfg: &AppConfig) -> Self {
        let registry = Arc::new(
            ToolRegistry::new(server, Duration::from_secs(cfg.tools.tool_timeout_secs.max(1)))
                .with_cache_ttl(Duration::from_secs(cfg.tools.cache_ttl_secs)),
        );
        Self {
            planner: Planner::new(
                llm,
                cfg.system_prompt(),
                Duration::from_secs(cfg.llm.timeouts.request.max(1)),
            ),
            executor: ToolExecutor::new(registry, cfg.agent.max_concurrent_tools),
            recovery: RecoveryEngine::new(Duration::from_millis(
                cfg.llm.timeouts.retry_delay_ms,
            )),
            memory: Arc::new(SessionMemory::new()),
            retention: cfg.memory.retention(),
            max_steps: cfg.agent.max_steps.max(1),
            turn_timeout: Duration::from_secs(cfg.agent.turn_timeout_secs.max(1)),
        }
    }

    /// 从配置创建 LLM 客户端与 MCP 客户端；工具列表在首次对话或显式 refresh 时拉取
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let llm = create_llm_client(&cfg.llm);
        let mcp = McpClient::from_config(&cfg.mcp).map_err(|e| AgentError::Config(e.to_string()))?;
        tracing::info!(
            provider = %cfg.llm.provider,
            model = %cfg.llm.model,
            mcp = %cfg.mcp.server_url,
            "agent created"
        );
        Ok(Self::new(llm, Arc::new(mcp), cfg))
    }

    /// 共享外部的会话存储
    pub fn with_memory(mut self, memory: Arc<SessionMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> &Arc<SessionMemory> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.executor.registry()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// 处理一轮对话
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> Result<AssistantReply, AgentError> {
        self.handle_turn_with(session_id, user_text, CancellationToken::new(), None)
            .await
    }

    /// 在后台任务中处理一轮对话，边跑边产出过程事件
    ///
    /// 该轮结束后事件通道关闭；入口校验失败时先发出一条 Error 事件。
    /// 丢弃接收端不会停止该轮，中断须通过 cancel。
    pub fn stream_turn(
        self: &Arc<Self>,
        session_id: String,
        user_text: String,
        cancel: CancellationToken,
    ) -> (
        UnboundedReceiver<ReactEvent>,
        JoinHandle<Result<AssistantReply, AgentError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = agent
                .handle_turn_with(&session_id, &user_text, cancel, Some(&tx))
                .await;
            if let Err(e) = &result {
                let _ = tx.send(ReactEvent::Error {
                    text: e.to_string(),
                });
            }
            result
        });
        (rx, handle)
    }

    /// 处理一轮对话：可取消、可推送过程事件
    ///
    /// 只有入口校验失败返回 Err；其余结局（包括 LLM 失败、超时、取消）都以 AssistantReply.status 表达
    pub async fn handle_turn_with(
        &self,
        session_id: &str,
        user_text: &str,
        cancel: CancellationToken,
        events: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<AssistantReply, AgentError> {
        if session_id.trim().is_empty() {
            return Err(AgentError::InvalidInput("session id must not be empty".to_string()));
        }
        if user_text.trim().is_empty() {
            return Err(AgentError::InvalidInput("message must not be empty".to_string()));
        }

        let mut conversation = self.memory.lock(session_id).await;
        conversation.append(Message::user(user_text));
        let tools = self.tools_for_turn().await;

        let mut session = ReactSession::new(&self.planner, &self.executor, &self.recovery, cancel)
            .with_max_steps(self.max_steps)
            .with_turn_timeout(self.turn_timeout);
        if let Some(tx) = events {
            session = session.with_event_tx(tx);
        }

        let reply = react_loop(&session, &mut conversation, &tools).await;
        let trimmed = conversation.trim(&self.retention);
        tracing::info!(
            session = %session_id,
            status = ?reply.status,
            steps = reply.steps,
            tool_calls = reply.tool_calls.len(),
            history = conversation.len(),
            trimmed,
            "turn finished"
        );
        Ok(reply)
    }

    /// 本轮使用的工具集；尚未成功加载过时先尝试 refresh，失败则用当前（可能为空的）集合
    async fn tools_for_turn(&self) -> Arc<ToolSet> {
        let registry = self.registry();
        if !registry.is_loaded() {
            if let Err(e) = registry.refresh().await {
                tracing::warn!(error = %e, "continuing turn without a fresh tool list");
            }
        }
        registry.snapshot().await
    }

    /// 重新拉取工具列表
    pub async fn refresh_tools(&self) -> Result<Arc<ToolSet>, AgentError> {
        self.registry().refresh().await
    }

    /// 当前工具集快照
    pub async fn tools(&self) -> Arc<ToolSet> {
        self.registry().snapshot().await
    }

    pub async fn history(&self, session_id: &str) -> Vec<Message> {
        self.memory.read(session_id).await
    }

    /// 清空某个会话；若该会话正在处理一轮，等其结束后再清空
    pub async fn reset_session(&self, session_id: &str) -> bool {
        self.memory.reset(session_id).await
    }

    /// 清理空闲会话
    pub async fn cleanup_idle_sessions(&self, idle: Duration) -> usize {
        self.memory.cleanup_expired(idle).await
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }

    pub async fn health(&self) -> HealthReport {
        let registry = self.registry();
        let loaded = registry.is_loaded();
        let stale = registry.is_stale();
        HealthReport {
            status: if loaded && !stale { "ok" } else { "degraded" },
            registry_loaded: loaded,
            registry_stale: stale,
            tool_count: registry.snapshot().await.len(),
            mcp_connected: registry.server_connected(),
            mcp_server: registry.server_name().await,
        }
    }
}
