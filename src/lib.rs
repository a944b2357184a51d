//! mcp-chat - 对话式智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（供 REPL / HTTP 调用）
//! - **alerts**: Grafana 告警调查与事件工单
//! - **api**: HTTP 前门的请求 / 响应结构
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、轮次状态、恢复策略、并发调度
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **mcp**: MCP 客户端（JSON-RPC over streamable HTTP）
//! - **memory**: 按会话分区的对话记忆与保留策略
//! - **react**: Planner 与 ReAct 主循环
//! - **tools**: 工具注册表、参数校验、结果缓存与执行器

pub mod agent;
pub mod alerts;
pub mod api;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{Agent, HealthReport};
pub use react::{AssistantReply, ReplyStatus, ToolCallSummary};
