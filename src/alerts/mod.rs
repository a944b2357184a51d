//! 告警调查：Grafana webhook → Agent 调查 → 事件工单
//!
//! 每条受理的告警在独立任务中跑一轮对话（会话 ID `alert-investigation-<uuid>`），
//! 从回复中提取结论并写成工单。调查失败时写入兜底结论，工单照常生成。

pub mod report;
pub mod tickets;
pub mod webhook;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::AlertsSection;
use crate::Agent;

pub use report::{investigation_prompt, Investigation};
pub use tickets::{priority_for, Ticket, TicketError, TicketStore};
pub use webhook::{select_alerts, GrafanaAlert, QueuedAlert, WebhookAck, WebhookPayload};

const SESSION_PREFIX: &str = "alert-investigation-";

pub struct AlertInvestigator {
    agent: Arc<Agent>,
    tickets: TicketStore,
    severities: Vec<String>,
}

impl AlertInvestigator {
    pub fn new(agent: Arc<Agent>, tickets: TicketStore, severities: Vec<String>) -> Self {
        Self {
            agent,
            tickets,
            severities,
        }
    }

    pub fn from_config(agent: Arc<Agent>, cfg: &AlertsSection) -> Self {
        Self::new(agent, TicketStore::new(&cfg.tickets_dir), cfg.severities.clone())
    }

    pub fn tickets(&self) -> &TicketStore {
        &self.tickets
    }

    /// 受理 webhook：筛选后每条告警派发一个后台调查任务，立即应答
    pub fn accept(self: &Arc<Self>, payload: &WebhookPayload) -> (WebhookAck, Vec<JoinHandle<()>>) {
        tracing::info!(
            status = %payload.status,
            alerts = payload.alerts.len(),
            "grafana webhook received"
        );
        let selected = match select_alerts(payload, &self.severities) {
            Ok(selected) => selected,
            Err(reason) => {
                tracing::info!(reason = %reason, "webhook ignored");
                return (WebhookAck::Ignored { reason }, Vec::new());
            }
        };

        let mut queued = Vec::with_capacity(selected.len());
        let mut handles = Vec::with_capacity(selected.len());
        for alert in selected {
            queued.push(QueuedAlert {
                fingerprint: alert.fingerprint.clone(),
                severity: alert.severity(),
                status: "queued_for_investigation",
            });
            let investigator = Arc::clone(self);
            let alert = alert.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = investigator.process(&alert).await {
                    tracing::error!(
                        fingerprint = %alert.fingerprint,
                        error = %e,
                        "alert processing failed"
                    );
                }
            }));
        }
        let ack = WebhookAck::Received {
            processed_count: queued.len(),
            alerts: queued,
        };
        (ack, handles)
    }

    /// 调查一条告警并写入工单
    pub async fn process(&self, alert: &GrafanaAlert) -> Result<Ticket, TicketError> {
        tracing::info!(fingerprint = %alert.fingerprint, alert = %alert.name(), "processing alert");
        let investigation = self.investigate(alert).await;
        let ticket = self
            .tickets
            .create(Ticket::from_investigation(&investigation))
            .await?;
        tracing::info!(
            ticket = %ticket.ticket_number,
            alert = %investigation.alert_name,
            confidence = investigation.confidence,
            "ticket created for alert"
        );
        Ok(ticket)
    }

    /// 在一个全新的会话上跑一轮调查；没有完成时返回兜底结论
    pub async fn investigate(&self, alert: &GrafanaAlert) -> Investigation {
        let session_id = format!("{SESSION_PREFIX}{}", uuid::Uuid::new_v4());
        let prompt = investigation_prompt(alert);
        let result = self.agent.handle_turn(&session_id, &prompt).await;
        // 调查会话只用一次
        self.agent.reset_session(&session_id).await;

        match result {
            Ok(reply) if reply.is_completed() => {
                tracing::debug!(
                    session = %session_id,
                    response = %reply.message,
                    "investigation response"
                );
                Investigation::from_reply(alert, &reply)
            }
            Ok(reply) => {
                tracing::warn!(
                    session = %session_id,
                    status = ?reply.status,
                    "investigation did not complete, using fallback"
                );
                Investigation::fallback(alert)
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "investigation failed");
                Investigation::fallback(alert)
            }
        }
    }
}
