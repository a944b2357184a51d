//! MCP 工具客户端：JSON-RPC 2.0 over streamable HTTP
//!
//! ToolServer 是注册表看到的抽象：列出工具、调用工具、报告连接状态。
//! McpClient 是它的 HTTP 实现；测试中可替换为故障注入的实现。

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{BackoffPolicy, McpClient};
pub use error::McpError;
pub use transport::HttpTransport;
pub use types::McpToolSchema;

/// 远端工具服务
#[async_trait]
pub trait ToolServer: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;

    /// 最近一次已知的连接状态；不应发起网络请求
    fn is_connected(&self) -> bool;

    /// 握手时服务端报告的名称（未握手时为 None）
    async fn server_name(&self) -> Option<String> {
        None
    }
}

#[async_trait]
impl ToolServer for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
        McpClient::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        McpClient::call_tool(self, name, arguments).await
    }

    fn is_connected(&self) -> bool {
        McpClient::is_connected(self)
    }

    async fn server_name(&self) -> Option<String> {
        McpClient::server_name(self).await
    }
}
