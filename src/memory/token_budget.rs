//! Token 估算
//!
//! 保留策略按 token 预算裁剪历史时使用；不依赖具体模型的分词器，按字符做近似。

use crate::memory::Message;

/// 每条消息的固定开销（角色、分隔符等）
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 估算一条消息（正文 + 工具调用参数）的 token 数
    pub fn estimate_message(msg: &Message) -> usize {
        let calls: usize = msg
            .tool_calls
            .iter()
            .map(|c| Self::estimate(&c.name) + Self::estimate(&c.arguments.to_string()))
            .sum();
        Self::estimate(&msg.content) + calls + MESSAGE_OVERHEAD_TOKENS
    }

    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}
