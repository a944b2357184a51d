//! HTTP 前门的请求 / 响应结构
//!
//! 对话接口的每一种结局（包括入口校验失败与内部错误）都以 ChatResponse 形状的 JSON 返回，
//! 前端无需区分纯文本错误。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::RequestUsage;
use crate::react::{AssistantReply, ReplyStatus, ToolCallSummary};

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

/// 对外的结局：ReplyStatus 之外多一个入口校验失败
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Completed,
    StepLimitExceeded,
    Failed,
    TimedOut,
    Cancelled,
    InvalidInput,
}

impl From<ReplyStatus> for ChatStatus {
    fn from(status: ReplyStatus) -> Self {
        match status {
            ReplyStatus::Completed => ChatStatus::Completed,
            ReplyStatus::StepLimitExceeded => ChatStatus::StepLimitExceeded,
            ReplyStatus::Failed => ChatStatus::Failed,
            ReplyStatus::TimedOut => ChatStatus::TimedOut,
            ReplyStatus::Cancelled => ChatStatus::Cancelled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub status: ChatStatus,
    pub tool_calls: Vec<ToolCallSummary>,
    #[serde(default)]
    pub usage: RequestUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<AssistantReply> for ChatResponse {
    fn from(reply: AssistantReply) -> Self {
        Self {
            message: reply.message,
            status: reply.status.into(),
            tool_calls: reply.tool_calls,
            usage: reply.usage,
            error: reply.error,
        }
    }
}

impl ChatResponse {
    /// 没有产生回复的失败（任务崩溃、工具列表不可用等）
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error: Some(message.clone()),
            message,
            status: ChatStatus::Failed,
            tool_calls: Vec::new(),
            usage: RequestUsage::default(),
        }
    }

    /// 把 Agent 错误折叠为 (HTTP 状态码, 结构化回复)
    pub fn from_error(err: &AgentError) -> (u16, Self) {
        match err {
            AgentError::InvalidInput(reason) => (
                400,
                Self {
                    status: ChatStatus::InvalidInput,
                    ..Self::failed(reason.clone())
                },
            ),
            AgentError::StaleRegistry(_) | AgentError::Transport(_) => {
                (502, Self::failed(err.to_string()))
            }
            other => (500, Self::failed(other.to_string())),
        }
    }
}
