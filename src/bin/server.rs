//! mcp-chat HTTP 服务
//!
//! 启动: cargo run --bin mcp-chat-server --features web
//! 接口：POST /api/chat、POST /api/chat/stream（SSE）、GET /health、GET /api/tools、
//! POST /api/tools/refresh、GET /api/sessions/:id/history、
//! POST /alerts/webhook、GET|DELETE /alerts/tickets、GET /alerts/tickets/:number

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use mcp_chat::alerts::{AlertInvestigator, Ticket, WebhookAck, WebhookPayload};
use mcp_chat::api::{ChatRequest, ChatResponse};
use mcp_chat::config::load_config;
use mcp_chat::core::AgentError;
use mcp_chat::memory::Message;
use mcp_chat::react::{AssistantReply, ReactEvent};
use mcp_chat::{observability, Agent, HealthReport};

type ApiError = (StatusCode, Json<ChatResponse>);

struct AppState {
    agent: Arc<Agent>,
    alerts: Arc<AlertInvestigator>,
}

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Serialize)]
struct ToolList {
    generation: u64,
    stale: bool,
    tools: Vec<ToolInfo>,
}

#[derive(Deserialize)]
struct TicketQuery {
    #[serde(default = "default_ticket_limit")]
    limit: usize,
}

fn default_ticket_limit() -> usize {
    50
}

fn error_response(e: &AgentError) -> ApiError {
    let (code, body) = ChatResponse::from_error(e);
    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(body))
}

fn internal_error(message: String) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ChatResponse::failed(message)),
    )
}

/// 每轮对话在独立任务中运行；客户端断开时 handler 被丢弃，drop guard 取消该轮
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let agent = Arc::clone(&state.agent);
    let handle = tokio::spawn(async move {
        agent
            .handle_turn_with(&req.session_id, &req.message, cancel, None)
            .await
    });
    let joined = handle.await;
    let _ = guard.disarm();

    let reply = joined
        .map_err(|e| internal_error(format!("turn task failed: {e}")))?
        .map_err(|e| error_response(&e))?;
    Ok(Json(ChatResponse::from(reply)))
}

enum ChatStream {
    Running {
        events: UnboundedReceiver<ReactEvent>,
        turn: JoinHandle<Result<AssistantReply, AgentError>>,
        guard: DropGuard,
    },
    Finished,
}

fn sse_event(kind: &str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(kind)
        .data(serde_json::to_string(payload).unwrap_or_default())
}

/// 过程事件逐条推送（event: react），最后推送一条 event: reply（ChatResponse）
///
/// 流被丢弃（客户端断开）时 guard 随之释放并取消该轮
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (events, turn) = state.agent.stream_turn(req.session_id, req.message, cancel);

    let initial = ChatStream::Running {
        events,
        turn,
        guard,
    };
    let event_stream = stream::unfold(initial, |state| async move {
        let ChatStream::Running {
            mut events,
            turn,
            guard,
        } = state
        else {
            return None;
        };
        if let Some(ev) = events.recv().await {
            let next = ChatStream::Running {
                events,
                turn,
                guard,
            };
            return Some((Ok::<_, Infallible>(sse_event("react", &ev)), next));
        }
        let response = match turn.await {
            Ok(Ok(reply)) => ChatResponse::from(reply),
            Ok(Err(e)) => ChatResponse::from_error(&e).1,
            Err(e) => ChatResponse::failed(format!("turn task failed: {e}")),
        };
        let _ = guard.disarm();
        let last = sse_event("reply", &response);
        Some((Ok::<_, Infallible>(last), ChatStream::Finished))
    });

    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

async fn api_health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.agent.health().await)
}

async fn tool_list(agent: &Agent) -> ToolList {
    let set = agent.tools().await;
    ToolList {
        generation: set.generation(),
        stale: agent.registry().is_stale(),
        tools: set
            .iter()
            .map(|t| ToolInfo {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect(),
    }
}

async fn api_tools(State(state): State<Arc<AppState>>) -> Json<ToolList> {
    Json(tool_list(&state.agent).await)
}

async fn api_tools_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ToolList>, ApiError> {
    state
        .agent
        .refresh_tools()
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(tool_list(&state.agent).await))
}

async fn api_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Vec<Message>> {
    Json(state.agent.history(&id).await)
}

/// POST /alerts/webhook：受理后立即应答，调查在后台进行
async fn alerts_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> Json<WebhookAck> {
    let (ack, _investigations) = state.alerts.accept(&payload);
    Json(ack)
}

type JsonError = (StatusCode, Json<Value>);

fn ticket_error(e: impl std::fmt::Display) -> JsonError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": e.to_string() })),
    )
}

async fn alerts_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TicketQuery>,
) -> Result<Json<Value>, JsonError> {
    let tickets = state
        .alerts
        .tickets()
        .list(query.limit)
        .await
        .map_err(ticket_error)?;
    Ok(Json(json!({ "count": tickets.len(), "tickets": tickets })))
}

async fn alerts_ticket(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<Json<Ticket>, JsonError> {
    match state.alerts.tickets().get(&number).await {
        Ok(Some(ticket)) => Ok(Json(ticket)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("Ticket {number} not found") })),
        )),
        Err(e) => Err(ticket_error(e)),
    }
}

async fn alerts_tickets_clear(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, JsonError> {
    let deleted = state
        .alerts
        .tickets()
        .clear()
        .await
        .map_err(ticket_error)?;
    Ok(Json(json!({ "status": "cleared", "deleted": deleted })))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load configuration")?;
    let agent = Arc::new(Agent::from_config(&cfg).context("Failed to create agent")?);
    if let Err(e) = agent.refresh_tools().await {
        tracing::warn!(error = %e, "initial tool discovery failed; will retry on first turn");
    }
    let alerts = Arc::new(AlertInvestigator::from_config(Arc::clone(&agent), &cfg.alerts));

    // 定期清理空闲会话
    let idle = cfg.memory.session_idle();
    let cleanup_agent = Arc::clone(&agent);
    tokio::spawn(async move {
        let period = (idle / 4).max(std::time::Duration::from_secs(30));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            cleanup_agent.cleanup_idle_sessions(idle).await;
        }
    });

    let state = Arc::new(AppState { agent, alerts });
    let app = Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/health", get(api_health))
        .route("/api/tools", get(api_tools))
        .route("/api/tools/refresh", post(api_tools_refresh))
        .route("/api/sessions/:id/history", get(api_history))
        .route("/alerts/webhook", post(alerts_webhook))
        .route(
            "/alerts/tickets",
            get(alerts_tickets).delete(alerts_tickets_clear),
        )
        .route("/alerts/tickets/:number", get(alerts_ticket))
        .with_state(state);

    let bind = std::env::var("MCP_CHAT_BIND").unwrap_or_else(|_| cfg.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("mcp-chat server: http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}
