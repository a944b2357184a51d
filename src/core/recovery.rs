//! 错误恢复引擎
//!
//! 根据 LLM 错误类型与已尝试次数返回 RecoveryAction，供推理循环决定是同一步内重试还是终止本轮。

use std::time::Duration;

use crate::core::RecoveryAction;
use crate::llm::LlmError;

/// 每步允许的重试次数
const MAX_RETRIES_PER_STEP: u32 = 1;

/// 把 LLM 错误映射为可执行动作（重试 / 终止并给出用户可读的说明）
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    retry_delay: Duration,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl RecoveryEngine {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    /// attempt 为已经失败的次数（首次失败为 1）
    pub fn handle(&self, err: &LlmError, attempt: u32) -> RecoveryAction {
        if err.is_retryable() && attempt <= MAX_RETRIES_PER_STEP {
            let delay = match err {
                // 限流时多等一会
                LlmError::RateLimited(_) => self.retry_delay * 2,
                _ => self.retry_delay,
            };
            return RecoveryAction::Retry(delay);
        }
        RecoveryAction::Abort(user_message(err))
    }
}

fn user_message(err: &LlmError) -> String {
    match err {
        LlmError::RateLimited(_) => {
            "Sorry, the language model is currently rate limited. Please try again in a moment."
                .to_string()
        }
        LlmError::Timeout | LlmError::Network(_) => {
            "Sorry, I could not reach the language model. Please try again.".to_string()
        }
        LlmError::Auth(_) => {
            "Sorry, the language model rejected our credentials. Please contact the administrator."
                .to_string()
        }
        LlmError::Api(_) | LlmError::Malformed(_) => {
            "Sorry, something went wrong while generating a response. Please try again.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_error_retried_once() {
        let engine = RecoveryEngine::new(Duration::from_millis(10));
        assert_eq!(
            engine.handle(&LlmError::Timeout, 1),
            RecoveryAction::Retry(Duration::from_millis(10))
        );
        assert!(matches!(engine.handle(&LlmError::Timeout, 2), RecoveryAction::Abort(_)));
    }

    #[test]
    fn test_rate_limit_waits_longer() {
        let engine = RecoveryEngine::new(Duration::from_millis(10));
        assert_eq!(
            engine.handle(&LlmError::RateLimited("429".into()), 1),
            RecoveryAction::Retry(Duration::from_millis(20))
        );
    }

    #[test]
    fn test_fatal_error_aborts_with_apology() {
        let engine = RecoveryEngine::default();
        match engine.handle(&LlmError::Auth("bad key".into()), 1) {
            RecoveryAction::Abort(text) => {
                assert!(text.starts_with("Sorry"));
                assert!(!text.contains("bad key"));
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }
}
