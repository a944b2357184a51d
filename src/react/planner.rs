//! Planner：组装 LLM 请求并解释回复
//!
//! 每次查询都带上 system prompt、完整历史与当前快照中的工具声明；单次请求超时取配置值与本轮剩余时间的较小者。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{LlmClient, LlmError, LlmReply, RequestUsage, ToolSpec};
use crate::memory::Message;
use crate::tools::ToolCallRequest;

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    request_timeout: Duration,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            request_timeout,
        }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 查询一次 LLM；budget 为本轮剩余时间。返回回复与这次请求的用量
    pub async fn plan(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        budget: Duration,
    ) -> Result<(LlmReply, RequestUsage), LlmError> {
        let limit = self.request_timeout.min(budget);
        let request = self.llm.complete_with_usage(&self.system_prompt, messages, tools);
        match tokio::time::timeout(limit, request).await {
            Ok(reply) => reply,
            Err(_) => Err(LlmError::Timeout),
        }
    }
}

/// 规范化调用 ID：空或与同一步内已有 ID 重复时替换为 `call_{step}_{index}`
pub fn normalize_call_ids(step: usize, calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.trim().is_empty() || seen.contains(&call.id) {
                let mut fresh = format!("call_{step}_{index}");
                while seen.contains(&fresh) {
                    fresh.push('_');
                }
                call.id = fresh;
            }
            seen.insert(call.id.clone());
            call
        })
        .collect()
}
