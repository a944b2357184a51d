//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / 脚本化）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, RecordedRequest, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, LlmReply, RequestUsage, ToolSpec};

use crate::config::LlmConfig;

/// 按配置创建 LLM 客户端：provider 为 "mock" 时离线运行，其余走 OpenAI 兼容接口
pub fn create_llm_client(cfg: &LlmConfig) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "mock" => Arc::new(MockLlmClient),
        _ => Arc::new(
            OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, cfg.api_key.as_deref())
                .with_temperature(cfg.temperature),
        ),
    }
}
