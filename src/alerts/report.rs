//! 调查提示词与调查报告
//!
//! 模型按固定小节（Root Cause Hypothesis / Impact Assessment / Recommended Actions / Evidence）
//! 作答，这里把自由文本拆回结构化字段；拆不出的字段用固定兜底文本。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::GrafanaAlert;
use crate::react::AssistantReply;

const MAX_ACTIONS: usize = 5;
const MAX_EVIDENCE: usize = 10;
const EVIDENCE_KEYWORDS: [&str; 6] = ["metric", "log", "dashboard", "query", "value", "error"];

/// 一次告警调查的结论
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub alert_name: String,
    pub severity: String,
    pub summary: String,
    pub root_cause_hypothesis: String,
    pub impact_assessment: String,
    pub recommended_actions: Vec<String>,
    pub related_evidence: Vec<String>,
    /// 0 到 1
    pub confidence: f64,
    pub investigated_at: DateTime<Utc>,
}

impl Investigation {
    /// 从一轮完成的对话中提取结论
    pub fn from_reply(alert: &GrafanaAlert, reply: &AssistantReply) -> Self {
        let text = &reply.message;
        Self {
            alert_name: alert.name(),
            severity: alert.severity(),
            summary: alert.summary(),
            root_cause_hypothesis: extract_section(text, "Root Cause"),
            impact_assessment: extract_section(text, "Impact"),
            recommended_actions: extract_actions(text),
            related_evidence: extract_evidence(text),
            confidence: confidence(reply.tool_calls.len(), text.chars().count()),
            investigated_at: Utc::now(),
        }
    }

    /// 调查没有得出回复时的兜底结论
    pub fn fallback(alert: &GrafanaAlert) -> Self {
        Self {
            alert_name: alert.name(),
            severity: alert.severity(),
            summary: alert.summary(),
            root_cause_hypothesis: "AI investigation failed - manual investigation required"
                .to_string(),
            impact_assessment: format!("Alert triggered: {}", alert.description()),
            recommended_actions: vec![
                "Check Grafana dashboard".to_string(),
                "Review recent deployments".to_string(),
                "Check service logs".to_string(),
            ],
            related_evidence: vec!["AI investigation unavailable".to_string()],
            confidence: 0.0,
            investigated_at: Utc::now(),
        }
    }

    /// 工单正文
    pub fn ticket_description(&self) -> String {
        let actions: Vec<String> = self
            .recommended_actions
            .iter()
            .enumerate()
            .map(|(i, action)| format!("  {}. {action}", i + 1))
            .collect();
        let evidence: Vec<String> = self
            .related_evidence
            .iter()
            .map(|item| format!("  - {item}"))
            .collect();
        format!(
            "=== ALERT DETAILS ===\n\
             Alert: {name}\n\
             Severity: {severity}\n\
             Summary: {summary}\n\
             Investigated: {at}\n\
             Confidence: {confidence:.0}%\n\n\
             === ROOT CAUSE HYPOTHESIS ===\n{root}\n\n\
             === IMPACT ASSESSMENT ===\n{impact}\n\n\
             === RECOMMENDED ACTIONS ===\n{actions}\n\n\
             === SUPPORTING EVIDENCE ===\n{evidence}\n\n\
             ---\n\
             This ticket was generated automatically by the mcp-chat alert investigator.",
            name = self.alert_name,
            severity = self.severity.to_uppercase(),
            summary = self.summary,
            at = self.investigated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            confidence = self.confidence * 100.0,
            root = self.root_cause_hypothesis,
            impact = self.impact_assessment,
            actions = actions.join("\n"),
            evidence = evidence.join("\n"),
        )
    }
}

/// 调查提示词：告警详情、指标值、标签，以及要求的作答小节
pub fn investigation_prompt(alert: &GrafanaAlert) -> String {
    let metrics = match &alert.values {
        Some(values) if !values.is_empty() => values
            .iter()
            .map(|(k, v)| format!("  - {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "  No metric values provided".to_string(),
    };
    let labels = alert
        .labels
        .iter()
        .map(|(k, v)| match v.as_str() {
            Some(s) => format!("  - {k}: {s}"),
            None => format!("  - {k}: {v}"),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "An alert has fired in production and requires investigation:

**Alert Details:**
- Name: {name}
- Severity: {severity}
- Summary: {summary}
- Description: {description}

**Current Metric Values:**
{metrics}

**Labels:**
{labels}

**Your Task:**
Please investigate this alert by:

1. **Check Recent Trends**: Query relevant Prometheus metrics for the last hour to see if this is a spike or ongoing issue
2. **Gather Context**: Check related metrics (CPU, memory, network, error rates) for the affected service/instance
3. **Review Logs**: Query Loki for error logs around the alert time
4. **Check Dashboards**: Look for relevant dashboards that show the service health
5. **Correlate**: Are other instances/services affected?

**Provide in your response:**
- **Root Cause Hypothesis**: What likely caused this alert? (2-3 sentences)
- **Impact Assessment**: What's affected and how severe? (2-3 sentences)
- **Recommended Actions**: List 3-4 specific steps to resolve (bullet points)
- **Evidence**: Cite specific metrics, log entries, or dashboard data you found

Focus on actionable insights for the on-call engineer.",
        name = alert.name(),
        severity = alert.severity().to_uppercase(),
        summary = alert.summary(),
        description = alert.description(),
    )
}

fn is_section_break(line: &str) -> bool {
    line.starts_with("**") || line.starts_with("###")
}

/// 标题行中标记之后的正文（`**Root Cause**: text` 中的 text）；`###` 标题整行都是标题
fn inline_remainder(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.rfind("**") {
        Some(i) => line[i + 2..].trim_start_matches(':').trim(),
        None => "",
    }
}

/// 取出名为 name 的小节：标题行之后直到下一个标题或小节后的空行
pub fn extract_section(text: &str, name: &str) -> String {
    let needle = name.to_lowercase();
    let mut collected: Vec<&str> = Vec::new();
    let mut in_section = false;

    for line in text.lines() {
        let is_header = line.to_lowercase().contains(&needle)
            && (line.contains("**") || line.contains("###"));
        if is_header && collected.is_empty() {
            in_section = true;
            let rest = inline_remainder(line);
            if !rest.is_empty() {
                collected.push(rest);
            }
            continue;
        }
        if !in_section {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !collected.is_empty() {
                break;
            }
            continue;
        }
        if is_section_break(trimmed) || trimmed.starts_with("- **") {
            break;
        }
        collected.push(trimmed);
    }

    if collected.is_empty() {
        format!("See full investigation for {name}")
    } else {
        collected.join(" ")
    }
}

/// Recommended Actions 小节下的条目（列表符号与编号去掉），最多 5 条
pub fn extract_actions(text: &str) -> Vec<String> {
    let mut actions = Vec::new();
    let mut in_actions = false;

    for line in text.lines() {
        let lower = line.to_lowercase();
        if !in_actions {
            in_actions = lower.contains("recommended") && lower.contains("action");
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_section_break(trimmed) || trimmed.starts_with("- **") {
            break;
        }
        let action = trimmed
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ' '))
            .trim();
        if !action.is_empty() {
            actions.push(action.to_string());
        }
        if actions.len() == MAX_ACTIONS {
            break;
        }
    }

    if actions.is_empty() {
        vec![
            "Review alert in Grafana".to_string(),
            "Check service logs".to_string(),
            "Escalate if needed".to_string(),
        ]
    } else {
        actions
    }
}

/// 看起来引用了指标、日志或面板数据的行，最多 10 条
pub fn extract_evidence(text: &str) -> Vec<String> {
    let evidence: Vec<String> = text
        .lines()
        .filter(|line| !line.starts_with('#') && line.contains(':'))
        .filter(|line| {
            let lower = line.to_lowercase();
            EVIDENCE_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .map(|line| line.trim().to_string())
        .take(MAX_EVIDENCE)
        .collect();

    if evidence.is_empty() {
        vec!["See investigation details above".to_string()]
    } else {
        evidence
    }
}

/// 调查可信度：工具调用越多、分析越长越高，保留两位小数
pub fn confidence(tool_calls: usize, message_chars: usize) -> f64 {
    let length_score = (message_chars as f64 / 2000.0).min(0.4);
    let score = (tool_calls as f64 * 0.15 + length_score).min(1.0);
    (score * 100.0).round() / 100.0
}
