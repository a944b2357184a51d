//! 保留策略：按消息数 / token 预算裁剪会话历史
//!
//! 裁剪单位：普通消息单独成组；assistant 工具调用消息与其后对应的 tool 结果成组，整组删除。
//! system 消息与最近一次 user 消息之后的全部内容不删除；剩余消息相对顺序不变。

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role, TokenEstimator};

/// 保留策略；None 表示该维度不限制
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_messages: Option<usize>,
    pub max_tokens: Option<usize>,
}

impl RetentionPolicy {
    pub fn new(max_messages: Option<usize>, max_tokens: Option<usize>) -> Self {
        Self {
            max_messages,
            max_tokens,
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    fn within(&self, count: usize, tokens: usize) -> bool {
        self.max_messages.map_or(true, |m| count <= m)
            && self.max_tokens.map_or(true, |t| tokens <= t)
    }
}

/// 连续消息下标区间 [start, end)
#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    droppable: bool,
}

/// 把历史切分为裁剪单位
fn units(messages: &[Message]) -> Vec<Unit> {
    let protected_from = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(messages.len());

    let mut out = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        let mut end = i + 1;
        if msg.is_tool_call() {
            let ids: Vec<&str> = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
            while end < messages.len()
                && messages[end].role == Role::Tool
                && messages[end].tool_call_id().is_some_and(|id| ids.contains(&id))
            {
                end += 1;
            }
        }
        out.push(Unit {
            start: i,
            end,
            droppable: msg.role != Role::System && end <= protected_from,
        });
        i = end;
    }
    out
}

/// 按策略就地裁剪，返回删除的消息条数
pub fn trim_messages(messages: &mut Vec<Message>, policy: &RetentionPolicy) -> usize {
    let mut count = messages.len();
    let mut tokens = TokenEstimator::estimate_messages(messages);
    if policy.within(count, tokens) {
        return 0;
    }

    let mut drop = vec![false; messages.len()];
    for unit in units(messages) {
        if policy.within(count, tokens) {
            break;
        }
        if !unit.droppable {
            continue;
        }
        for (idx, flag) in drop.iter_mut().enumerate().take(unit.end).skip(unit.start) {
            *flag = true;
            count -= 1;
            tokens = tokens.saturating_sub(TokenEstimator::estimate_message(&messages[idx]));
        }
    }

    let before = messages.len();
    let mut idx = 0;
    messages.retain(|_| {
        let keep = !drop[idx];
        idx += 1;
        keep
    });
    before - messages.len()
}
