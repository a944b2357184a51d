//! 推理过程事件：用于流式/SSE 展示步数、工具调用、观察与回复

use serde::Serialize;

use crate::core::TurnPhase;
use crate::tools::ToolErrorKind;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 步数更新（当前第几次 LLM 查询）
    StepUpdate { step: usize, max_steps: usize },
    /// 状态机转移
    Phase { phase: TurnPhase },
    /// 正在调用 LLM
    Thinking,
    /// LLM 随工具调用附带的文字
    ThinkingContent { text: String },
    /// 调用工具
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        call_id: String,
        tool: String,
        preview: String,
    },
    /// 工具执行失败
    ToolFailure {
        call_id: String,
        tool: String,
        kind: ToolErrorKind,
        reason: String,
    },
    /// 错误恢复动作（retry / abort）
    Recovery { action: String, detail: String },
    /// 最终回复的一小段（流式输出）
    MessageChunk { text: String },
    /// 最终回复结束
    MessageDone,
    /// Token 使用统计：本轮各次请求自身报告的用量，以及进程累计（含其他会话）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        /// 进程累计 total tokens
        cumulative_total: u64,
    },
    /// 错误
    Error { text: String },
}
