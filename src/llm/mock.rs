//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! MockLlmClient：回显最后一条 user 消息；若上一条是工具结果，则把结果转述为最终回复。
//! ScriptedLlmClient：按预设脚本逐条返回回复，并记录每次请求，供测试断言。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, LlmReply, RequestUsage, ToolSpec};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        if let Some(last) = messages.last().filter(|m| m.role == Role::Tool) {
            return Ok(LlmReply::Final(format!("Tool result: {}", last.content)));
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(LlmReply::Final(format!("Echo from Mock: {last_user}")))
    }
}

/// 一次被记录的 LLM 请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// 脚本化客户端：依次返回脚本中的回复；脚本用完后返回 fallback（若有）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    fallback: Option<LlmReply>,
    delay: Duration,
    /// 每次成功回复报告的用量
    usage: RequestUsage,
    consumed: Mutex<RequestUsage>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = Result<LlmReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 永远返回同一个回复
    pub fn repeating(reply: LlmReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    /// 每次调用前等待（用于超时 / 取消测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 每次成功回复报告固定的 token 用量
    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = RequestUsage::new(prompt_tokens, completion_tokens);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        let consumed = *self.consumed.lock().unwrap_or_else(PoisonError::into_inner);
        (consumed.prompt_tokens, consumed.completion_tokens, consumed.total())
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        self.complete_with_usage(system, messages, tools)
            .await
            .map(|(reply, _)| reply)
    }

    async fn complete_with_usage(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<(LlmReply, RequestUsage), LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                system: system.to_string(),
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let reply = match (next, &self.fallback) {
            (Some(reply), _) => reply?,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => return Err(LlmError::Api("script exhausted".to_string())),
        };
        *self.consumed.lock().unwrap_or_else(PoisonError::into_inner) += self.usage;
        Ok((reply, self.usage))
    }
}
