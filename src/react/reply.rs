//! 一轮对话的返回值

use serde::{Deserialize, Serialize};

use crate::llm::RequestUsage;
use crate::tools::{ToolCallResult, ToolErrorKind};

/// 本轮的结束方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Completed,
    StepLimitExceeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// 本轮执行过的一次工具调用摘要
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub call_id: String,
    pub tool: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    pub elapsed_ms: u64,
}

impl From<&ToolCallResult> for ToolCallSummary {
    fn from(r: &ToolCallResult) -> Self {
        Self {
            call_id: r.call_id.clone(),
            tool: r.tool_name.clone(),
            ok: r.is_success(),
            error_kind: r.error_kind(),
            elapsed_ms: r.elapsed_ms,
        }
    }
}

/// 助手回复
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub message: String,
    pub status: ReplyStatus,
    /// 本轮 LLM 查询次数
    pub steps: usize,
    pub tool_calls: Vec<ToolCallSummary>,
    /// 本轮各次 LLM 请求的 token 用量之和
    #[serde(default)]
    pub usage: RequestUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssistantReply {
    pub fn is_completed(&self) -> bool {
        self.status == ReplyStatus::Completed
    }
}
