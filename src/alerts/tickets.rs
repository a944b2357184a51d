//! 事件工单：每张工单一个 JSON 文件
//!
//! 工单号形如 `INC20261018101500`；同一秒内的多张工单追加 `-2`、`-3` 后缀。
//! 列表按工单号倒序（即新建时间倒序）。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::alerts::Investigation;

const TICKET_PREFIX: &str = "INC";

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ticket encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// severity 对应的工单优先级
pub fn priority_for(severity: &str) -> &'static str {
    match severity {
        "critical" => "P1",
        "high" => "P2",
        "warning" => "P3",
        _ => "P4",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_number: String,
    pub priority: String,
    pub short_description: String,
    pub description: String,
    pub assignment_group: String,
    pub category: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub ai_generated: bool,
    pub investigation_summary: String,
}

impl Ticket {
    /// 由调查结论生成（工单号由 TicketStore 分配）
    pub fn from_investigation(investigation: &Investigation) -> Self {
        Self {
            ticket_number: String::new(),
            priority: priority_for(&investigation.severity).to_string(),
            short_description: format!(
                "[{}] {}",
                investigation.severity.to_uppercase(),
                investigation.alert_name
            ),
            description: investigation.ticket_description(),
            assignment_group: "platform-ops".to_string(),
            category: "Infrastructure".to_string(),
            state: "New".to_string(),
            created_at: Utc::now(),
            ai_generated: true,
            investigation_summary: investigation.root_cause_hypothesis.clone(),
        }
    }
}

/// 工单目录
#[derive(Clone, Debug)]
pub struct TicketStore {
    dir: PathBuf,
}

impl TicketStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 工单号只允许字母数字与 '-'，防止路径穿越
    fn path_for(&self, number: &str) -> Option<PathBuf> {
        let valid = !number.is_empty()
            && number.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| self.dir.join(format!("{number}.json")))
    }

    /// 分配工单号并写入；文件以 create_new 打开，同名时换下一个后缀
    pub async fn create(&self, mut ticket: Ticket) -> Result<Ticket, TicketError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let base = format!(
            "{TICKET_PREFIX}{}",
            ticket.created_at.format("%Y%m%d%H%M%S")
        );
        let mut attempt = 1u32;
        loop {
            ticket.ticket_number = match attempt {
                1 => base.clone(),
                n => format!("{base}-{n}"),
            };
            let path = self.dir.join(format!("{}.json", ticket.ticket_number));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    let body = serde_json::to_vec_pretty(&ticket)?;
                    file.write_all(&body).await?;
                    file.flush().await?;
                    tracing::info!(
                        ticket = %ticket.ticket_number,
                        priority = %ticket.priority,
                        path = %path.display(),
                        "ticket written"
                    );
                    return Ok(ticket);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get(&self, number: &str) -> Result<Option<Ticket>, TicketError> {
        let Some(path) = self.path_for(number) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn ticket_files(&self) -> Result<Vec<PathBuf>, TicketError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// 最新的 limit 张工单；无法解析的文件记日志后跳过
    pub async fn list(&self, limit: usize) -> Result<Vec<Ticket>, TicketError> {
        let mut files = self.ticket_files().await?;
        files.sort_by_key(|path| ticket_order(path));
        files.reverse();

        let mut tickets = Vec::new();
        for path in files.into_iter().take(limit) {
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<Ticket>(&bytes).map_err(TicketError::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "skipping unreadable ticket"
                ),
            }
        }
        Ok(tickets)
    }

    /// 删除全部工单；返回删除数量
    pub async fn clear(&self) -> Result<usize, TicketError> {
        let files = self.ticket_files().await?;
        for path in &files {
            tokio::fs::remove_file(path).await?;
        }
        tracing::info!(deleted = files.len(), "tickets cleared");
        Ok(files.len())
    }
}

/// 工单号排序键：时间戳部分，再按同秒后缀数值
fn ticket_order(path: &Path) -> (String, u32) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.split_once('-') {
        Some((base, suffix)) => (base.to_string(), suffix.parse().unwrap_or(0)),
        None => (stem.to_string(), 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::GrafanaAlert;
    use serde_json::json;

    fn investigation(severity: &str) -> Investigation {
        let alert: GrafanaAlert = serde_json::from_value(json!({
            "status": "firing",
            "labels": {"alertname": "DiskFull", "severity": severity},
            "fingerprint": "fp"
        }))
        .unwrap();
        Investigation::fallback(&alert)
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(priority_for("critical"), "P1");
        assert_eq!(priority_for("high"), "P2");
        assert_eq!(priority_for("warning"), "P3");
        assert_eq!(priority_for("info"), "P4");
        assert_eq!(priority_for("unknown"), "P4");
    }

    #[test]
    fn test_ticket_fields() {
        let ticket = Ticket::from_investigation(&investigation("high"));
        assert_eq!(ticket.priority, "P2");
        assert_eq!(ticket.short_description, "[HIGH] DiskFull");
        assert_eq!(ticket.assignment_group, "platform-ops");
        assert_eq!(ticket.state, "New");
        assert!(ticket.ai_generated);
        assert_eq!(
            ticket.investigation_summary,
            "AI investigation failed - manual investigation required"
        );
    }

    #[tokio::test]
    async fn test_same_second_tickets_get_distinct_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let store = TicketStore::new(dir.path().join("tickets"));
        let ticket = Ticket::from_investigation(&investigation("critical"));

        let first = store.create(ticket.clone()).await.unwrap();
        let second = store.create(ticket.clone()).await.unwrap();
        let third = store.create(ticket).await.unwrap();
        assert!(first.ticket_number.starts_with("INC"));
        assert_eq!(second.ticket_number, format!("{}-2", first.ticket_number));

        let listed: Vec<String> = store
            .list(10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.ticket_number)
            .collect();
        assert_eq!(
            listed,
            vec![third.ticket_number.clone(), second.ticket_number, first.ticket_number.clone()]
        );
        assert_eq!(store.list(1).await.unwrap().len(), 1);

        let fetched = store.get(&first.ticket_number).await.unwrap().unwrap();
        assert_eq!(fetched.priority, "P1");
        assert!(store.get("INC0").await.unwrap().is_none());
        assert!(store.get("../secrets").await.unwrap().is_none());

        assert_eq!(store.clear().await.unwrap(), 3);
        assert!(store.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TicketStore::new(dir.path().join("absent"));
        assert!(store.list(50).await.unwrap().is_empty());
        assert_eq!(store.clear().await.unwrap(), 0);
    }
}
