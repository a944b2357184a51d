//! 工具调用请求与结果
//!
//! ToolCallRequest 由 LLM 发出，ToolCallResult 由执行器产出；二者以 call id 一一对应。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// LLM 请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 调用 ID（同一步内唯一）
    pub id: String,
    /// 工具名
    pub name: String,
    /// 参数（校验前视为不透明 JSON）
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 失败类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// 参数未通过 schema 校验
    Validation,
    /// 工具不在注册表中
    UnknownTool,
    /// 连接 / 协议层失败
    Transport,
    /// 单次调用超时
    Timeout,
    /// 服务端报告工具执行失败（isError）
    ToolError,
    /// 请求或响应超过传输层大小限制
    PayloadTooLarge,
}

/// 调用结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { kind: ToolErrorKind, message: String },
}

/// 单次工具调用的结果（每个请求恰好一个）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub elapsed_ms: u64,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, payload: Value, elapsed_ms: u64) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            outcome: ToolOutcome::Success { payload },
            elapsed_ms,
        }
    }

    pub fn failure(
        request: &ToolCallRequest,
        kind: ToolErrorKind,
        message: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            outcome: ToolOutcome::Failure {
                kind,
                message: message.into(),
            },
            elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// 渲染为 tool 消息正文（发给 LLM 的文本）
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload } => match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Failure { kind, message } => {
                let kind = serde_json::to_value(kind)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_else(|| format!("{kind:?}"));
                format!("Error ({kind}): {message}")
            }
        }
    }
}
