//! 会话记忆
//!
//! 按 session id 分区；每个会话一把 tokio Mutex（FIFO），一轮对话期间独占写入，
//! 同一会话的后续请求排队等待。会话之间完全并行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::memory::{trim_messages, Message, RetentionPolicy};

/// 会话 ID（外部提供的不透明字符串）
pub type SessionId = String;

/// 单个会话
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 追加消息（唯一的写入路径）
    pub fn append(&mut self, msg: Message) {
        self.messages.push(msg);
        self.last_active = Utc::now();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 清空历史；返回清除的消息条数
    pub fn clear(&mut self) -> usize {
        let cleared = self.messages.len();
        self.messages.clear();
        self.last_active = Utc::now();
        cleared
    }

    /// 按保留策略裁剪；只应在两轮对话之间调用
    pub fn trim(&mut self, policy: &RetentionPolicy) -> usize {
        trim_messages(&mut self.messages, policy)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    fn is_expired(&self, idle: Duration) -> bool {
        let idle = chrono::Duration::from_std(idle)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Utc::now() - self.last_active > idle
    }
}

/// 独占持有某个会话（drop 时释放）
pub type SessionGuard = OwnedMutexGuard<Session>;

/// 会话记忆：所有会话的分区存储
#[derive(Default)]
pub struct SessionMemory {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(slot) = self.sessions.read().await.get(session_id) {
            return slot.clone();
        }
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(session_id))))
            .clone()
    }

    /// 获取会话的独占访问（不存在则创建）；同一会话的并发调用按到达顺序排队
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        self.slot(session_id).await.lock_owned().await
    }

    pub async fn append(&self, session_id: &str, msg: Message) {
        self.lock(session_id).await.append(msg);
    }

    /// 读取会话历史副本；会话不存在时返回空
    pub async fn read(&self, session_id: &str) -> Vec<Message> {
        let slot = self.sessions.read().await.get(session_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.messages().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn trim(&self, session_id: &str, policy: &RetentionPolicy) -> usize {
        let slot = self.sessions.read().await.get(session_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.trim(policy),
            None => 0,
        }
    }

    /// 清空会话历史；先排队拿到该会话的锁，进行中的一轮结束后才清空，槽位保留以维持单写者
    ///
    /// 返回是否确有历史被清除
    pub async fn reset(&self, session_id: &str) -> bool {
        let slot = self.sessions.read().await.get(session_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.clear() > 0,
            None => false,
        }
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 清理空闲超时的会话
    ///
    /// 只删除除 map 外无人引用的槽位：持有锁或正在排队等锁的会话都会保留
    pub async fn cleanup_expired(&self, idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(session) => !session.is_expired(idle),
                Err(_) => true,
            }
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "expired sessions cleaned up");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_is_monotonic() {
        let memory = SessionMemory::new();
        let mut last = 0;
        for i in 0..5 {
            memory.append("s1", Message::user(format!("m{i}"))).await;
            let msgs = memory.read("s1").await;
            assert_eq!(msgs.len(), last + 1);
            assert_eq!(msgs.last().unwrap().content, format!("m{i}"));
            last = msgs.len();
        }
        let contents: Vec<String> = memory
            .read("s1")
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_read_unknown_session_is_empty() {
        let memory = SessionMemory::new();
        assert!(memory.read("nope").await.is_empty());
        assert!(!memory.contains("nope").await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let memory = SessionMemory::new();
        memory.append("a", Message::user("for a")).await;
        memory.append("b", Message::user("for b")).await;
        assert_eq!(memory.read("a").await.len(), 1);
        assert_eq!(memory.read("b").await[0].content, "for b");
        assert_eq!(memory.len().await, 2);
    }

    #[tokio::test]
    async fn test_lock_serializes_writers() {
        let memory = Arc::new(SessionMemory::new());
        let guard = memory.lock("s").await;

        let m = memory.clone();
        let waiter = tokio::spawn(async move {
            m.append("s", Message::user("second")).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let mut guard = guard;
        guard.append(Message::user("first"));
        drop(guard);
        waiter.await.unwrap();

        let contents: Vec<String> = memory.read("s").await.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_reset_waits_for_in_flight_turn() {
        let memory = Arc::new(SessionMemory::new());
        let mut guard = memory.lock("s").await;
        guard.append(Message::user("in flight"));

        let m = memory.clone();
        let reset = tokio::spawn(async move { m.reset("s").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reset.is_finished());

        // 第二个写者必须等待当前持锁者
        let second = tokio::time::timeout(Duration::from_millis(50), memory.lock("s")).await;
        assert!(second.is_err());

        guard.append(Message::assistant("done"));
        drop(guard);
        assert!(reset.await.unwrap());
        assert!(memory.read("s").await.is_empty());
        assert!(memory.contains("s").await);

        memory.append("s", Message::user("after reset")).await;
        assert_eq!(memory.read("s").await.len(), 1);
        assert!(!memory.reset("missing").await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_sessions_with_waiters() {
        let memory = Arc::new(SessionMemory::new());
        let guard = memory.lock("s").await;
        let m = memory.clone();
        let waiter = tokio::spawn(async move { m.append("s", Message::user("queued")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(memory.cleanup_expired(Duration::ZERO).await, 0);
        drop(guard);
        waiter.await.unwrap();
        assert_eq!(memory.read("s").await.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_skips_locked_sessions() {
        let memory = SessionMemory::new();
        memory.append("idle", Message::user("x")).await;
        let _busy = memory.lock("busy").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = memory.cleanup_expired(Duration::ZERO).await;
        assert_eq!(removed, 1);
        assert!(memory.contains("busy").await);
    }
}
