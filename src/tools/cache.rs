//! 工具结果缓存
//!
//! 按 (工具名, 规范化参数) 缓存成功结果，TTL 过期；ttl 为 0 时不缓存。失败结果从不缓存。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

#[derive(Debug, Clone)]
struct CachedPayload {
    payload: Value,
    stored_at: Instant,
}

/// 工具结果缓存（线程安全）
#[derive(Debug, Default)]
pub struct ToolResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CachedPayload>>,
}

impl ToolResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// serde_json 的 Map 按键排序，to_string 即规范形式
    fn key(tool: &str, args: &Value) -> (String, String) {
        (tool.to_string(), args.to_string())
    }

    /// 未过期则返回缓存的结果
    pub fn get(&self, tool: &str, args: &Value) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(tool, args);
        match entries.get(&key) {
            Some(c) if c.stored_at.elapsed() < self.ttl => Some(c.payload.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, tool: &str, args: &Value, payload: Value) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(
            Self::key(tool, args),
            CachedPayload {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
