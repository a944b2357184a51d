//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MCP_CHAT__*` 覆盖（双下划线表示嵌套，如 `MCP_CHAT__LLM__MODEL=gpt-4o`）。
//! 另外兼容常见变量 OPENAI_API_KEY / OPENAI_MODEL / OPENAI_BASE_URL / MCP_SERVER_URL。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::memory::RetentionPolicy;

const ENV_PREFIX: &str = "MCP_CHAT";
const DEFAULT_PROMPT_FILE: &str = "config/prompts/system.txt";

/// 默认 system prompt（可被 [app] system_prompt_path 或 config/prompts/system.txt 覆盖）
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an SRE assistant that helps users explore Grafana, Prometheus, and Loki data.
Use the provided tools to answer questions with accurate telemetry context.
When the user asks for dashboards or metrics, call the appropriate tool.
Keep responses concise but include enough detail for operators to act.";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmConfig,
    pub mcp: McpConfig,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub memory: MemorySection,
    pub server: ServerSection,
    pub alerts: AlertsSection,
}

/// [app] 段：应用名、system prompt 文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "mcp-chat".to_string(),
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// openai（任意 OpenAI 兼容端点）/ mock（离线）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 采样温度，默认 0.1 以保持工具选择稳定；设为 None 时交给服务端默认值
    pub temperature: Option<f32>,
    pub timeouts: LlmTimeouts,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            temperature: Some(0.1),
            timeouts: LlmTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeouts {
    /// 单次 LLM 请求超时（秒）
    pub request: u64,
    /// 暂时性错误重试前的等待（毫秒）
    pub retry_delay_ms: u64,
}

impl Default for LlmTimeouts {
    fn default() -> Self {
        Self {
            request: 60,
            retry_delay_ms: 500,
        }
    }
}

/// [mcp] 段：服务端地址、鉴权、传输限制与重连退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
    pub max_payload_bytes: usize,
    pub backoff: BackoffConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001/mcp".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
            max_payload_bytes: 4 * 1024 * 1024,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 200,
            cap_ms: 5_000,
            max_attempts: 3,
        }
    }
}

/// [agent] 段：推理循环上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 每轮最多 LLM 查询次数
    pub max_steps: usize,
    /// 整轮对话的截止时间（秒）
    pub turn_timeout_secs: u64,
    /// 同一步内同时在途的工具调用数
    pub max_concurrent_tools: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 8,
            turn_timeout_secs: 120,
            max_concurrent_tools: 4,
        }
    }
}

/// [tools] 段：单次调用超时与结果缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 结果缓存 TTL（秒），0 表示不缓存
    pub cache_ttl_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            cache_ttl_secs: 0,
        }
    }
}

/// [memory] 段：会话保留策略与空闲过期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub max_messages: Option<usize>,
    pub max_tokens: Option<usize>,
    /// 会话空闲多久后被清理（秒）
    pub session_idle_secs: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_messages: Some(200),
            max_tokens: Some(24_000),
            session_idle_secs: 3_600,
        }
    }
}

impl MemorySection {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.max_messages, self.max_tokens)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// [alerts] 段：告警调查的工单目录与受理的严重级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    pub tickets_dir: PathBuf,
    /// 只有这些 severity 标签（小写）会触发调查
    pub severities: Vec<String>,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            tickets_dir: PathBuf::from("data/tickets"),
            severities: vec!["critical".to_string(), "high".to_string()],
        }
    }
}

impl AppConfig {
    /// system prompt：显式路径 > config/prompts/system.txt > 内置默认
    pub fn system_prompt(&self) -> String {
        let candidates = self
            .app
            .system_prompt_path
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(Path::new(DEFAULT_PROMPT_FILE)));
        for path in candidates {
            match std::fs::read_to_string(path) {
                Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(_) => {}
                Err(e) if path != Path::new(DEFAULT_PROMPT_FILE) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "cannot read system prompt, falling back"
                    );
                }
                Err(_) => {}
            }
        }
        DEFAULT_SYSTEM_PROMPT.to_string()
    }

    /// 兼容常见环境变量；`MCP_CHAT__*` 中显式设置的同名键优先
    fn apply_conventional_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let prefixed = |key: &str| lookup(&format!("{ENV_PREFIX}__{key}")).is_some();
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if self.llm.api_key.is_none() {
            self.llm.api_key = get("OPENAI_API_KEY");
        }
        if let Some(model) = get("OPENAI_MODEL").filter(|_| !prefixed("LLM__MODEL")) {
            self.llm.model = model;
        }
        if let Some(url) = get("OPENAI_BASE_URL").filter(|_| !prefixed("LLM__BASE_URL")) {
            self.llm.base_url = Some(url);
        }
        if let Some(url) = get("MCP_SERVER_URL").filter(|_| !prefixed("MCP__SERVER_URL")) {
            self.mcp.server_url = url;
        }
    }
}

/// 从 config 目录加载配置，环境变量 MCP_CHAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 MCP_CHAT__*（双下划线表示嵌套键）
/// 4. 最后兼容 OPENAI_* / MCP_SERVER_URL
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_conventional_env(|k| std::env::var(k).ok());
    Ok(cfg)
}
