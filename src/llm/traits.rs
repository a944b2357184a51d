//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / 脚本化测试客户端）实现 LlmClient：
//! 输入 system prompt、完整历史与可用工具，输出最终回复或一组工具调用。

use std::ops::AddAssign;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolCallRequest;

/// 发给 LLM 的工具声明
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// LLM 一次回复的解释结果
#[derive(Clone, Debug, PartialEq)]
pub enum LlmReply {
    /// 直接回复用户
    Final(String),
    /// 请求调用工具；content 为模型随调用附带的文字（可为空）
    ToolCalls {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
}

/// 单次请求消耗的 token
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl RequestUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for RequestUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// LLM 调用失败
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error: {0}")]
    Api(String),

    /// 输出无法解释（例如工具参数不是合法 JSON）
    #[error("malformed output: {0}")]
    Malformed(String),
}

impl LlmError {
    /// 暂时性错误：同一步内可重试一次
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::Timeout
                | LlmError::Network(_)
                | LlmError::Malformed(_)
        )
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError>;

    /// 完成并返回本次请求自身的 token 用量；不报告用量的后端记为 0
    async fn complete_with_usage(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<(LlmReply, RequestUsage), LlmError> {
        let reply = self.complete(system, messages, tools).await?;
        Ok((reply, RequestUsage::default()))
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
