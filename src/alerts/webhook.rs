//! Grafana 告警 webhook 的载荷与筛选

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单条告警
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaAlert {
    /// firing / resolved
    pub status: String,
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    #[serde(default)]
    pub starts_at: String,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    pub fingerprint: String,
    #[serde(default)]
    pub values: Option<BTreeMap<String, f64>>,
}

impl GrafanaAlert {
    fn label(&self, key: &str) -> Option<String> {
        self.labels.get(key).map(value_text)
    }

    fn annotation(&self, key: &str) -> Option<String> {
        self.annotations.get(key).map(value_text)
    }

    pub fn name(&self) -> String {
        self.label("alertname")
            .unwrap_or_else(|| "Unknown Alert".to_string())
    }

    /// severity 标签（小写）；缺省为 info
    pub fn severity(&self) -> String {
        self.label("severity")
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn summary(&self) -> String {
        self.annotation("summary").unwrap_or_else(|| self.name())
    }

    pub fn description(&self) -> String {
        self.annotation("description")
            .unwrap_or_else(|| "No description".to_string())
    }
}

/// webhook 载荷（Grafana unified alerting，version 4）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub receiver: String,
    pub status: String,
    #[serde(default)]
    pub alerts: Vec<GrafanaAlert>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, Value>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, Value>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, Value>,
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub group_key: String,
    #[serde(default)]
    pub truncated_alerts: u32,
}

fn default_version() -> String {
    "4".to_string()
}

/// 已排队调查的告警
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueuedAlert {
    pub fingerprint: String,
    pub severity: String,
    pub status: &'static str,
}

/// webhook 的应答
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookAck {
    Ignored {
        reason: String,
    },
    Received {
        processed_count: usize,
        alerts: Vec<QueuedAlert>,
    },
}

/// 按载荷状态与 severity 筛选需要调查的告警
///
/// 载荷不是 firing 时整体忽略；否则只保留 severity 在 `severities` 中的告警
pub fn select_alerts<'p>(
    payload: &'p WebhookPayload,
    severities: &[String],
) -> Result<Vec<&'p GrafanaAlert>, String> {
    if payload.status != "firing" {
        return Err(format!("Alert status is {}", payload.status));
    }
    let selected = payload
        .alerts
        .iter()
        .filter(|alert| {
            let severity = alert.severity();
            let wanted = severities.iter().any(|s| s.eq_ignore_ascii_case(&severity));
            if !wanted {
                tracing::info!(
                    fingerprint = %alert.fingerprint,
                    severity = %severity,
                    "skipping alert below investigation threshold"
                );
            }
            wanted
        })
        .collect();
    Ok(selected)
}

/// 标签值可能是任意 JSON；字符串取原文，其余取 JSON 文本
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
