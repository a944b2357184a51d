//! 告警调查端到端测试：webhook 受理 → 脚本化调查 → 工单落盘

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use mcp_chat::alerts::{AlertInvestigator, TicketStore, WebhookAck, WebhookPayload};
use mcp_chat::config::AppConfig;
use mcp_chat::llm::{LlmClient, LlmError, LlmReply, ScriptedLlmClient};
use mcp_chat::mcp::{McpError, McpToolSchema, ToolServer};
use mcp_chat::tools::ToolCallRequest;
use mcp_chat::Agent;

const ANSWER: &str = "\
**Root Cause Hypothesis**: Disk on db-1 filled up after WAL archiving stalled.

**Impact Assessment**: Writes to the orders database are failing.

**Recommended Actions:**
1. Free space on db-1
2. Restart the WAL archiver

**Evidence:**
- Metric node_filesystem_avail_bytes: 0 on db-1
";

struct PrometheusServer;

#[async_trait]
impl ToolServer for PrometheusServer {
    async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
        Ok(vec![McpToolSchema {
            name: "query_prometheus".into(),
            description: Some("Run a PromQL query".into()),
            input_schema: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }])
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, McpError> {
        Ok(json!({"result": [{"metric": {"instance": "db-1"}, "value": [0, "0"]}]}))
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn payload(status: &str, alerts: &[(&str, &str)]) -> WebhookPayload {
    let alerts: Vec<Value> = alerts
        .iter()
        .map(|(fingerprint, severity)| {
            json!({
                "status": status,
                "labels": {"alertname": "DiskFull", "severity": severity, "instance": "db-1"},
                "annotations": {"summary": "Disk almost full", "description": "db-1 disk at 99%"},
                "startsAt": "2026-10-18T10:00:00Z",
                "fingerprint": fingerprint,
                "values": {"A": 99.2}
            })
        })
        .collect();
    serde_json::from_value(json!({
        "receiver": "mcp-chat",
        "status": status,
        "alerts": alerts,
        "groupLabels": {"alertname": "DiskFull"},
        "commonLabels": {},
        "commonAnnotations": {},
        "externalURL": "http://grafana.local",
        "version": "4",
        "groupKey": "{}:{alertname=\"DiskFull\"}",
        "truncatedAlerts": 0
    }))
    .unwrap()
}

fn investigator(llm: Arc<dyn LlmClient>, tickets: TicketStore) -> Arc<AlertInvestigator> {
    let mut cfg = AppConfig::default();
    cfg.llm.timeouts.retry_delay_ms = 10;
    let agent = Arc::new(Agent::new(llm, Arc::new(PrometheusServer), &cfg));
    Arc::new(AlertInvestigator::new(
        agent,
        tickets,
        vec!["critical".to_string(), "high".to_string()],
    ))
}

#[tokio::test]
async fn test_critical_alert_becomes_ticket() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(LlmReply::ToolCalls {
            content: String::new(),
            calls: vec![ToolCallRequest::new(
                "q1",
                "query_prometheus",
                json!({"query": "node_filesystem_avail_bytes"}),
            )],
        }),
        Ok(LlmReply::Final(ANSWER.into())),
    ]));
    let investigator = investigator(llm.clone(), TicketStore::new(dir.path()));

    let webhook = payload("firing", &[("fp-crit", "critical"), ("fp-warn", "warning")]);
    let (ack, handles) = investigator.accept(&webhook);
    assert_eq!(
        serde_json::to_value(&ack).unwrap(),
        json!({
            "status": "received",
            "processed_count": 1,
            "alerts": [{
                "fingerprint": "fp-crit",
                "severity": "critical",
                "status": "queued_for_investigation"
            }]
        })
    );
    for handle in handles {
        handle.await.unwrap();
    }

    let tickets = investigator.tickets().list(50).await.unwrap();
    assert_eq!(tickets.len(), 1);
    let ticket = &tickets[0];
    assert_eq!(ticket.priority, "P1");
    assert_eq!(ticket.short_description, "[CRITICAL] DiskFull");
    assert_eq!(
        ticket.investigation_summary,
        "Disk on db-1 filled up after WAL archiving stalled."
    );
    assert!(ticket.description.contains("  1. Free space on db-1"));
    assert!(ticket.description.contains("node_filesystem_avail_bytes: 0 on db-1"));

    // 调查提示词作为一个全新会话的首条消息发出
    let first = &llm.requests()[0];
    assert_eq!(first.messages.len(), 1);
    assert!(first.messages[0].content.contains("- Name: DiskFull"));
}

#[tokio::test]
async fn test_failed_investigation_still_files_ticket() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Err(LlmError::Auth("bad key".into())),
    ]));
    let investigator = investigator(llm, TicketStore::new(dir.path()));

    let (_, handles) = investigator.accept(&payload("firing", &[("fp-high", "high")]));
    for handle in handles {
        handle.await.unwrap();
    }

    let tickets = investigator.tickets().list(50).await.unwrap();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].priority, "P2");
    assert_eq!(
        tickets[0].investigation_summary,
        "AI investigation failed - manual investigation required"
    );
}

#[tokio::test]
async fn test_resolved_webhook_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![]));
    let investigator = investigator(llm.clone(), TicketStore::new(dir.path()));

    let (ack, handles) = investigator.accept(&payload("resolved", &[("fp", "critical")]));
    assert_eq!(
        ack,
        WebhookAck::Ignored {
            reason: "Alert status is resolved".into()
        }
    );
    assert!(handles.is_empty());
    assert_eq!(llm.call_count(), 0);
    assert!(investigator.tickets().list(50).await.unwrap().is_empty());
}
