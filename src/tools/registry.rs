//! 工具注册表
//!
//! 把 MCP 服务端公布的每个工具包装成 ToolDescriptor（名称、描述、schema、调用句柄），
//! 循环只通过描述符调用工具，不区分具体工具。工具集合整体 copy-and-swap：
//! refresh 成功后原子替换，读者拿到的 Arc<ToolSet> 永远是完整的一版。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::llm::ToolSpec;
use crate::mcp::{McpError, McpToolSchema, ToolServer};
use crate::tools::{
    validate_arguments, ToolCallRequest, ToolCallResult, ToolErrorKind, ToolResultCache,
};

/// 一个可调用的远端工具
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    server: Arc<dyn ToolServer>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn new(schema: McpToolSchema, server: Arc<dyn ToolServer>) -> Self {
        Self {
            name: schema.name,
            description: schema.description.unwrap_or_default(),
            input_schema: schema.input_schema,
            server,
        }
    }

    pub fn validate(&self, args: &Value) -> Result<(), String> {
        validate_arguments(&self.input_schema, args)
    }

    pub async fn call(&self, args: Value) -> Result<Value, McpError> {
        self.server.call_tool(&self.name, args).await
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// 某一次 refresh 得到的工具集合（不可变）
#[derive(Debug, Default)]
pub struct ToolSet {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    generation: u64,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 按服务端顺序建立；重名时保留第一个
    pub fn from_schemas(
        schemas: Vec<McpToolSchema>,
        server: Arc<dyn ToolServer>,
        generation: u64,
    ) -> Self {
        let mut set = Self {
            generation,
            ..Self::default()
        };
        for schema in schemas {
            if set.index.contains_key(&schema.name) {
                tracing::warn!(tool = %schema.name, "duplicate tool name from server, skipped");
                continue;
            }
            set.index.insert(schema.name.clone(), set.tools.len());
            set.tools.push(ToolDescriptor::new(schema, server.clone()));
        }
        set
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 发给 LLM 的工具声明
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolDescriptor::spec).collect()
    }
}

/// 工具注册表：持有当前 ToolSet、单次调用超时与结果缓存
pub struct ToolRegistry {
    server: Arc<dyn ToolServer>,
    current: RwLock<Arc<ToolSet>>,
    refresh_lock: Mutex<()>,
    loaded: AtomicBool,
    stale: AtomicBool,
    generation: AtomicU64,
    tool_timeout: Duration,
    cache: ToolResultCache,
}

impl ToolRegistry {
    pub fn new(server: Arc<dyn ToolServer>, tool_timeout: Duration) -> Self {
        Self {
            server,
            current: RwLock::new(Arc::new(ToolSet::empty())),
            refresh_lock: Mutex::new(()),
            loaded: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            tool_timeout,
            cache: ToolResultCache::new(Duration::ZERO),
        }
    }

    /// 启用结果缓存（ttl 为 0 时等同于关闭）
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = ToolResultCache::new(ttl);
        self
    }

    /// 重新拉取工具列表；失败时保留上一版工具集并标记 stale
    pub async fn refresh(&self) -> Result<Arc<ToolSet>, AgentError> {
        let _guard = self.refresh_lock.lock().await;
        match self.server.list_tools().await {
            Ok(schemas) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let set = Arc::new(ToolSet::from_schemas(schemas, self.server.clone(), generation));
                *self.current.write().await = set.clone();
                self.loaded.store(true, Ordering::Relaxed);
                self.stale.store(false, Ordering::Relaxed);
                self.cache.clear();
                tracing::info!(tools = set.len(), generation, "tool registry refreshed");
                Ok(set)
            }
            Err(e) => {
                self.stale.store(true, Ordering::Relaxed);
                let kept = self.current.read().await.len();
                tracing::warn!(
                    error = %e,
                    kept_tools = kept,
                    "tool registry refresh failed, keeping previous tool set"
                );
                Err(AgentError::StaleRegistry(e.to_string()))
            }
        }
    }

    /// 当前工具集（一次性快照）
    pub async fn snapshot(&self) -> Arc<ToolSet> {
        self.current.read().await.clone()
    }

    /// 在当前快照上调用工具
    pub async fn invoke(&self, request: &ToolCallRequest) -> ToolCallResult {
        let set = self.snapshot().await;
        self.invoke_with(&set, request).await
    }

    /// 在给定快照上调用工具；无论成功、失败、超时都恰好返回一个结果
    pub async fn invoke_with(&self, set: &ToolSet, request: &ToolCallRequest) -> ToolCallResult {
        let start = Instant::now();
        let Some(tool) = set.get(&request.name) else {
            return ToolCallResult::failure(
                request,
                ToolErrorKind::UnknownTool,
                format!("unknown tool: {}", request.name),
                0,
            );
        };

        if let Some(payload) = self.cache.get(&request.name, &request.arguments) {
            tracing::debug!(tool = %request.name, "tool result served from cache");
            return ToolCallResult::success(request, payload, 0);
        }

        let outcome = timeout(self.tool_timeout, tool.call(request.arguments.clone())).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(payload)) => {
                self.cache.put(&request.name, &request.arguments, payload.clone());
                ToolCallResult::success(request, payload, elapsed_ms)
            }
            Ok(Err(e)) => {
                let kind = error_kind(&e);
                let message = match kind {
                    ToolErrorKind::Transport => AgentError::Transport(e.to_string()).to_string(),
                    _ => e.to_string(),
                };
                ToolCallResult::failure(request, kind, message, elapsed_ms)
            }
            Err(_) => ToolCallResult::failure(
                request,
                ToolErrorKind::Timeout,
                format!("tool call timed out after {}s", self.tool_timeout.as_secs_f64()),
                elapsed_ms,
            ),
        }
    }

    /// 至少成功 refresh 过一次
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Relaxed)
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// 服务端最近一次已知的连接状态
    pub fn server_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub async fn server_name(&self) -> Option<String> {
        self.server.server_name().await
    }

    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    pub fn cache(&self) -> &ToolResultCache {
        &self.cache
    }
}

fn error_kind(err: &McpError) -> ToolErrorKind {
    match err {
        McpError::ToolFailed { .. } => ToolErrorKind::ToolError,
        McpError::PayloadTooLarge { .. } => ToolErrorKind::PayloadTooLarge,
        McpError::Timeout => ToolErrorKind::Timeout,
        _ => ToolErrorKind::Transport,
    }
}
