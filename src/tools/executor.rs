//! 工具执行器
//!
//! 一步内的全部工具调用：先逐个校验（未知工具、参数 schema），无效调用直接合成 failure，不触达网络；
//! 有效调用在并发许可内同时派发，结果按请求顺序返回。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;

use futures_util::future::join_all;

use crate::core::{AgentError, TaskScheduler};
use crate::tools::{
    ToolCallRequest, ToolCallResult, ToolErrorKind, ToolOutcome, ToolRegistry, ToolSet,
};

/// 工具执行器：校验 + 受限并发 + 审计
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_concurrent_tools: usize) -> Self {
        Self {
            registry,
            scheduler: TaskScheduler::new(max_concurrent_tools),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行一批调用；返回值与 requests 一一对应、顺序一致
    pub async fn execute_batch(
        &self,
        set: &ToolSet,
        requests: &[ToolCallRequest],
    ) -> Vec<ToolCallResult> {
        join_all(requests.iter().map(|req| self.execute_one(set, req))).await
    }

    async fn execute_one(&self, set: &ToolSet, request: &ToolCallRequest) -> ToolCallResult {
        let result = match precheck(set, request) {
            Err(rejected) => rejected,
            Ok(()) => match self.scheduler.acquire_tool().await {
                Some(_permit) => self.registry.invoke_with(set, request).await,
                None => ToolCallResult::failure(
                    request,
                    ToolErrorKind::Transport,
                    "tool scheduler closed",
                    0,
                ),
            },
        };
        audit(request, &result);
        result
    }
}

/// 本地校验；不通过时返回合成的 failure
fn precheck(set: &ToolSet, request: &ToolCallRequest) -> Result<(), ToolCallResult> {
    let Some(tool) = set.get(&request.name) else {
        return Err(ToolCallResult::failure(
            request,
            ToolErrorKind::UnknownTool,
            format!("unknown tool: {}", request.name),
            0,
        ));
    };
    tool.validate(&request.arguments).map_err(|reason| {
        let err = AgentError::Validation {
            tool: request.name.clone(),
            reason,
        };
        ToolCallResult::failure(request, ToolErrorKind::Validation, err.to_string(), 0)
    })
}

fn audit(request: &ToolCallRequest, result: &ToolCallResult) {
    let outcome = match &result.outcome {
        ToolOutcome::Success { .. } => "ok".to_string(),
        ToolOutcome::Failure { kind, .. } => serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "error".to_string()),
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": request.name,
        "call_id": request.id,
        "ok": result.is_success(),
        "outcome": outcome,
        "duration_ms": result.elapsed_ms,
        "args_preview": args_preview(&request.arguments),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{McpError, McpToolSchema, ToolServer};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录调用次数与最大并发数
    #[derive(Default)]
    struct CountingServer {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ToolServer for CountingServer {
        async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
            Ok(vec![McpToolSchema {
                name: "query_metric".into(),
                description: None,
                input_schema: json!({
                    "type": "object",
                    "properties": {"host": {"type": "string"}},
                    "required": ["host"]
                }),
            }])
        }

        async fn call_tool(&self, _name: &str, arguments: Value) -> Result<Value, McpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(arguments["host"].clone())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_batch_validates_and_preserves_order() {
        let server = Arc::new(CountingServer::default());
        let registry = Arc::new(ToolRegistry::new(server.clone(), Duration::from_secs(1)));
        let set = registry.refresh().await.unwrap();
        let executor = ToolExecutor::new(registry, 4);

        let requests = vec![
            ToolCallRequest::new("c1", "query_metric", json!({"host": "A"})),
            ToolCallRequest::new("c2", "query_metric", json!({})),
            ToolCallRequest::new("c3", "delete_everything", json!({})),
            ToolCallRequest::new("c4", "query_metric", json!({"host": "B"})),
        ];
        let results = executor.execute_batch(&set, &requests).await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
        assert_eq!(results[1].error_kind(), Some(ToolErrorKind::Validation));
        assert_eq!(results[2].error_kind(), Some(ToolErrorKind::UnknownTool));
        assert_eq!(results[3].render(), "B");
        assert_eq!(server.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let server = Arc::new(CountingServer::default());
        let registry = Arc::new(ToolRegistry::new(server.clone(), Duration::from_secs(1)));
        let set = registry.refresh().await.unwrap();
        let executor = ToolExecutor::new(registry, 2);

        let requests: Vec<_> = (0..6)
            .map(|i| {
                let args = json!({"host": format!("h{i}")});
                ToolCallRequest::new(format!("c{i}"), "query_metric", args)
            })
            .collect();
        let results = executor.execute_batch(&set, &requests).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.is_success()));
        assert!(server.max_in_flight.load(Ordering::SeqCst) <= 2);
    }
}
