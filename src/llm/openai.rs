//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；工具以 function tool 的形式声明，
//! 模型返回的 tool_calls 解析为 ToolCallRequest。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, LlmReply, RequestUsage, ToolSpec};
use crate::memory::{Message, Role};
use crate::tools::ToolCallRequest;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) if !url.is_empty() => OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key),
            _ => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
            usage: TokenUsage::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        system: &str,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default().content(system).build()?,
        ));
        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()?,
                ),
                Role::Assistant if m.is_tool_call() => {
                    let calls: Vec<ChatCompletionMessageToolCalls> = m
                        .tool_calls
                        .iter()
                        .map(|c| {
                            ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                                id: c.id.clone(),
                                function: FunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    args.tool_calls(calls);
                    if !m.content.is_empty() {
                        args.content(m.content.clone());
                    }
                    ChatCompletionRequestMessage::Assistant(args.build()?)
                }
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()?,
                ),
                Role::Tool => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(m.content.clone())
                        .tool_call_id(m.tool_call_id().unwrap_or_default())
                        .build()?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }

    fn to_openai_tools(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
        tools
            .iter()
            .map(|t| {
                ChatCompletionTools::Function(ChatCompletionTool {
                    function: FunctionObject {
                        name: t.name.clone(),
                        description: (!t.description.is_empty()).then(|| t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                        strict: None,
                    },
                })
            })
            .collect()
    }
}

/// 解析模型返回的 tool_calls；参数为空串视为空对象
fn parse_tool_calls(
    calls: Vec<ChatCompletionMessageToolCalls>,
) -> Result<Vec<ToolCallRequest>, LlmError> {
    calls
        .into_iter()
        .map(|call| match call {
            ChatCompletionMessageToolCalls::Function(f) => {
                let raw = f.function.arguments.trim();
                let arguments = if raw.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(raw).map_err(|e| {
                        LlmError::Malformed(format!(
                            "arguments for '{}' are not valid JSON: {e}",
                            f.function.name
                        ))
                    })?
                };
                Ok(ToolCallRequest::new(f.id, f.function.name, arguments))
            }
            ChatCompletionMessageToolCalls::Custom(_) => {
                Err(LlmError::Malformed("custom tool calls are not supported".to_string()))
            }
        })
        .collect()
}

fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => LlmError::Network(e.to_string()),
        OpenAIError::ApiError(api) => {
            let kind = format!(
                "{} {}",
                api.r#type.as_deref().unwrap_or_default(),
                api.code.as_deref().unwrap_or_default()
            );
            if kind.contains("rate_limit") || kind.contains("insufficient_quota") {
                LlmError::RateLimited(api.message)
            } else if kind.contains("invalid_api_key") || kind.contains("authentication") {
                LlmError::Auth(api.message)
            } else {
                LlmError::Api(api.message)
            }
        }
        OpenAIError::JSONDeserialize(e, _) => LlmError::Malformed(e.to_string()),
        other => LlmError::Api(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
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
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(Self::to_openai_messages(system, messages).map_err(map_openai_error)?);
        if !tools.is_empty() {
            args.tools(Self::to_openai_tools(tools));
        }
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        let request = args.build().map_err(map_openai_error)?;

        let response = self.client.chat().create(request).await.map_err(map_openai_error)?;

        // 提取 token 使用统计：本次请求的用量随回复返回，同时计入进程累计
        let usage = response
            .usage
            .as_ref()
            .map(|u| RequestUsage::new(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();
        self.usage.add(usage.prompt_tokens, usage.completion_tokens);

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))?;
        let content = message.content.unwrap_or_default();

        let reply = match message.tool_calls {
            Some(calls) if !calls.is_empty() => LlmReply::ToolCalls {
                content,
                calls: parse_tool_calls(calls)?,
            },
            _ => LlmReply::Final(content),
        };
        Ok((reply, usage))
    }
}
