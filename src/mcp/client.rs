//! MCP 客户端
//!
//! 懒初始化：首次请求时完成 initialize 握手并发送 notifications/initialized，之后每个请求都带上
//! Mcp-Session-Id。可重试错误（连接失败、会话过期、502/503/504）会丢弃会话，按指数退避重连，
//! 次数用尽后把错误交给上层。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::config::McpConfig;
use crate::mcp::transport::HttpTransport;
use crate::mcp::types::{
    initialize_params, CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    McpToolSchema,
};
use crate::mcp::McpError;

/// tools/list 分页上限，防止服务端游标不收敛
const MAX_LIST_PAGES: usize = 64;

/// 指数退避：base * 2^attempt + 抖动，封顶 cap
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base.as_millis() as u64);
        (exp + Duration::from_millis(jitter_ms)).min(self.cap)
    }
}

#[derive(Clone, Debug)]
struct McpSession {
    session_id: Option<String>,
    server_name: String,
}

/// 连接单个 MCP 服务端的客户端；可在多个任务间共享（Arc）
pub struct McpClient {
    transport: HttpTransport,
    backoff: BackoffPolicy,
    next_id: AtomicU64,
    session: RwLock<Option<McpSession>>,
    connect_lock: Mutex<()>,
    connected: AtomicBool,
}

impl McpClient {
    pub fn new(transport: HttpTransport, backoff: BackoffPolicy) -> Self {
        Self {
            transport,
            backoff,
            next_id: AtomicU64::new(1),
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &McpConfig) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.request_timeout_secs.clamp(1, 10)))
            .build()
            .map_err(|e| McpError::Transport(e.to_string()))?;
        let transport = HttpTransport::new(
            http,
            cfg.server_url.clone(),
            cfg.auth_token.clone().filter(|t| !t.is_empty()),
            Duration::from_secs(cfg.request_timeout_secs.max(1)),
            cfg.max_payload_bytes,
        );
        let backoff = BackoffPolicy {
            base: Duration::from_millis(cfg.backoff.base_ms),
            cap: Duration::from_millis(cfg.backoff.cap_ms),
            max_attempts: cfg.backoff.max_attempts.max(1),
        };
        Ok(Self::new(transport, backoff))
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// 最近一次已知的连接状态（不发起网络请求）
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn server_name(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.server_name.clone())
    }

    /// 列出全部工具（跟随 nextCursor 分页）
    pub async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    tracing::debug!(count = tools.len(), "mcp tools listed");
                    return Ok(tools);
                }
            }
        }
        Err(McpError::Protocol(format!("tools/list did not finish within {MAX_LIST_PAGES} pages")))
    }

    /// 调用工具，返回归一化后的结果
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {e}")))?;
        if call.is_error {
            let message = call.joined_text();
            return Err(McpError::ToolFailed {
                tool: name.to_string(),
                message: if message.is_empty() {
                    "tool reported an error".to_string()
                } else {
                    message
                },
            });
        }
        Ok(call.into_payload())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let mut attempt = 0;
        loop {
            let sid = match self.ensure_session().await {
                Ok(sid) => sid,
                Err(e) if self.should_retry(&e, attempt) => {
                    self.back_off(method, &e, attempt).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let req = JsonRpcRequest::new(id, method, params.clone());
            let result = match self.transport.post(&req, sid.as_deref()).await {
                Ok(reply) => into_result(reply.message),
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    self.drop_session(sid.as_deref()).await;
                    if !self.should_retry(&e, attempt) {
                        return Err(e);
                    }
                    self.back_off(method, &e, attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn should_retry(&self, err: &McpError, attempt: u32) -> bool {
        err.is_retryable() && attempt + 1 < self.backoff.max_attempts
    }

    async fn back_off(&self, method: &str, err: &McpError, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        tracing::warn!(
            method,
            error = %err,
            attempt = attempt + 1,
            max_attempts = self.backoff.max_attempts,
            "mcp request failed, reconnecting after {:?}",
            delay
        );
        tokio::time::sleep(delay).await;
    }

    /// 返回当前会话 id；没有会话时完成握手（单飞）
    async fn ensure_session(&self) -> Result<Option<String>, McpError> {
        if let Some(s) = self.session.read().await.as_ref() {
            return Ok(s.session_id.clone());
        }
        let _guard = self.connect_lock.lock().await;
        if let Some(s) = self.session.read().await.as_ref() {
            return Ok(s.session_id.clone());
        }

        let session = match self.initialize().await {
            Ok(s) => s,
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                return Err(e);
            }
        };
        let sid = session.session_id.clone();
        *self.session.write().await = Some(session);
        self.connected.store(true, Ordering::Relaxed);
        Ok(sid)
    }

    async fn initialize(&self) -> Result<McpSession, McpError> {
        let req = JsonRpcRequest::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            "initialize",
            Some(initialize_params(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        );
        let reply = self.transport.post(&req, None).await?;
        let session_id = reply.session_id;
        let result = into_result(reply.message)?;

        let server_name = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let protocol = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let initialized = JsonRpcRequest::notification("notifications/initialized");
        self.transport.post(&initialized, session_id.as_deref()).await?;

        tracing::info!(
            url = %self.transport.url(),
            server = %server_name,
            protocol,
            has_session = session_id.is_some(),
            "mcp session established"
        );
        Ok(McpSession {
            session_id,
            server_name,
        })
    }

    /// 只丢弃仍是 stale 的那个会话，避免清掉并发请求刚建立的新会话
    async fn drop_session(&self, stale: Option<&str>) {
        let mut session = self.session.write().await;
        if session.as_ref().is_some_and(|s| s.session_id.as_deref() == stale) {
            *session = None;
            self.connected.store(false, Ordering::Relaxed);
            tracing::debug!("mcp session dropped");
        }
    }
}

fn into_result(message: Option<JsonRpcResponse>) -> Result<Value, McpError> {
    let message = message.ok_or_else(|| McpError::Protocol("empty response".to_string()))?;
    if let Some(err) = message.error {
        return Err(McpError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    message
        .result
        .ok_or_else(|| McpError::Protocol("response carries neither result nor error".to_string()))
}
