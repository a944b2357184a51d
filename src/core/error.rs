//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：Oracle 错误决定 Retry / Abort；工具层错误折叠为 failure 结果，不会中止一轮对话。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具参数未通过 schema 校验（本地合成 failure 结果）
    #[error("Validation error for tool '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    /// MCP 连接 / 调用失败（客户端重试耗尽后）
    #[error("Transport error: {0}")]
    Transport(String),

    /// LLM 提供方失败（限流、超时、输出格式错误等）
    #[error("LLM error: {0}")]
    Oracle(#[from] LlmError),

    /// 推理步数达到上限
    #[error("Step limit exceeded ({0} steps)")]
    StepLimitExceeded(usize),

    /// 工具列表刷新失败，继续使用上一次的工具集
    #[error("Tool registry is stale: {0}")]
    StaleRegistry(String),

    /// 入口校验失败（空消息、空会话 ID）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待给定时长后在同一步内重试一次
    Retry(std::time::Duration),
    /// 终止当前轮次，向用户返回给定的说明文本
    Abort(String),
}
