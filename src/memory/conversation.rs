//! 对话消息
//!
//! user / assistant / tool 三类消息按顺序追加；assistant 发起工具调用时携带 tool_calls，
//! tool 消息携带对应的 ToolCallResult。消息追加后不可修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::{ToolCallRequest, ToolCallResult};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 发起的工具调用（仅 assistant）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 工具调用结果（仅 tool）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolCallResult>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// assistant 发起一组工具调用；content 为模型随调用附带的文字（可为空）
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        let mut msg = Self::new(Role::Assistant, content.into());
        msg.tool_calls = calls;
        msg
    }

    /// tool 消息：正文为结果渲染文本
    pub fn tool(result: ToolCallResult) -> Self {
        let mut msg = Self::new(Role::Tool, result.render());
        msg.tool_result = Some(result);
        msg
    }

    pub fn is_tool_call(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// tool 消息对应的 call id
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.call_id.as_str())
    }
}
