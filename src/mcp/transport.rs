//! Streamable HTTP 传输
//!
//! 每条 JSON-RPC 消息一次 POST；响应可能是 application/json，也可能是 text/event-stream，
//! 后者从事件流中取出与请求 id 匹配的响应。

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::McpError;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// 一次 POST 的结果
#[derive(Debug)]
pub struct HttpReply {
    /// 服务端返回的 Mcp-Session-Id（仅 initialize 时会新发）
    pub session_id: Option<String>,
    /// 通知（202 无 body）时为 None
    pub message: Option<JsonRpcResponse>,
}

/// HTTP 传输：共享一个 reqwest::Client（内部连接池）
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
    max_payload_bytes: usize,
}

impl HttpTransport {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            auth_token,
            timeout,
            max_payload_bytes,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    pub async fn post(
        &self,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<HttpReply, McpError> {
        let body = serde_json::to_vec(request).map_err(|e| McpError::Protocol(e.to_string()))?;
        if body.len() > self.max_payload_bytes {
            return Err(McpError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_payload_bytes,
            });
        }

        let mut req = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .timeout(self.timeout)
            .body(body);
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(sid) = session_id {
            req = req.header(SESSION_HEADER, sid);
        }

        let mut response = req.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND && session_id.is_some() {
            return Err(McpError::SessionExpired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let new_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if let Some(len) = response.content_length() {
            if len as usize > self.max_payload_bytes {
                return Err(McpError::PayloadTooLarge {
                    size: len as usize,
                    limit: self.max_payload_bytes,
                });
            }
        }
        // 分块读取：无 Content-Length 的分块 / SSE 响应一旦超限立即停止
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let size = bytes.len() + chunk.len();
            if size > self.max_payload_bytes {
                tracing::warn!(
                    size,
                    limit = self.max_payload_bytes,
                    "mcp response exceeds payload limit"
                );
                return Err(McpError::PayloadTooLarge {
                    size,
                    limit: self.max_payload_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        let message = match (request.id, bytes.is_empty() || status == StatusCode::ACCEPTED) {
            (_, true) => None,
            (None, false) => None,
            (Some(id), false) if is_sse => {
                let text = String::from_utf8_lossy(&bytes);
                Some(parse_sse(&text, id)?)
            }
            (Some(_), false) => Some(
                serde_json::from_slice::<JsonRpcResponse>(&bytes)
                    .map_err(|e| McpError::Protocol(format!("invalid JSON-RPC response: {e}")))?,
            ),
        };

        Ok(HttpReply {
            session_id: new_session,
            message,
        })
    }
}

/// 从 SSE body 中找出 id 匹配的 JSON-RPC 响应；服务端通知和请求被忽略
pub fn parse_sse(body: &str, id: u64) -> Result<JsonRpcResponse, McpError> {
    let normalized = body.replace("\r\n", "\n");
    for event in normalized.split("\n\n") {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if data.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<JsonRpcResponse>(&data.join("\n")) else {
            tracing::debug!("skipping non JSON-RPC sse event");
            continue;
        };
        if msg.is_response() && msg.matches(id) {
            return Ok(msg);
        }
    }
    Err(McpError::Protocol(format!("no response for id {id} in event stream")))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_picks_matching_response() {
        let body = "event: message\r\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\r\n\r\n\
                    event: message\r\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":6,\"result\":{\"ok\":false}}\r\n\r\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\r\n\r\n";
        let msg = parse_sse(body, 7).unwrap();
        assert_eq!(msg.result.unwrap()["ok"], true);
    }

    #[test]
    fn test_parse_sse_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\ndata: \"id\":1,\"result\":{}}\n\n";
        assert!(parse_sse(body, 1).is_ok());
    }

    #[test]
    fn test_parse_sse_without_response_is_protocol_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n\n";
        assert!(matches!(parse_sse(body, 1), Err(McpError::Protocol(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "错误".repeat(300);
        let t = truncate(&s, 500);
        assert!(t.ends_with("..."));
    }
}
