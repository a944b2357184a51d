//! MCP 客户端错误

use thiserror::Error;

/// MCP 客户端层的错误；`is_retryable` 决定是否丢弃会话并重连
#[derive(Debug, Error)]
pub enum McpError {
    /// 建立连接 / 发送请求失败
    #[error("transport error: {0}")]
    Transport(String),

    /// 非 2xx 响应
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// 服务端不再认识当前 Mcp-Session-Id（HTTP 404）
    #[error("mcp session expired")]
    SessionExpired,

    /// JSON-RPC error 响应
    #[error("rpc error [{code}]: {message}")]
    Rpc { code: i64, message: String },

    /// tools/call 返回 isError: true
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// 请求或响应超过大小限制
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// 响应格式不符合协议
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 请求超时
    #[error("request timed out")]
    Timeout,
}

impl McpError {
    /// 连接类失败、会话过期、网关类状态码可重试；读超时不重试（调用可能已在服务端执行）
    pub fn is_retryable(&self) -> bool {
        match self {
            McpError::Transport(_) | McpError::SessionExpired => true,
            McpError::Http { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            McpError::Timeout
        } else {
            McpError::Transport(e.to_string())
        }
    }
}
