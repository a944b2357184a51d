//! 一轮对话的状态机
//!
//! AwaitingLlm → (FinalAnswer | ToolCallsRequested) → AwaitingToolResults → AwaitingLlm → …
//! → Done | StepLimitExceeded | Fatal | TimedOut | Cancelled

use serde::Serialize;

/// 推理循环所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingLlm,
    FinalAnswer,
    ToolCallsRequested,
    AwaitingToolResults,
    Done,
    StepLimitExceeded,
    Fatal,
    TimedOut,
    Cancelled,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnPhase::Done
                | TurnPhase::StepLimitExceeded
                | TurnPhase::Fatal
                | TurnPhase::TimedOut
                | TurnPhase::Cancelled
        )
    }

    /// 状态机允许的转移
    pub fn can_transition_to(self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        match (self, next) {
            (_, Cancelled) | (_, TimedOut) => !self.is_terminal(),
            (AwaitingLlm, FinalAnswer | ToolCallsRequested | Fatal | StepLimitExceeded) => true,
            (FinalAnswer, Done) => true,
            (ToolCallsRequested, AwaitingToolResults) => true,
            (AwaitingToolResults, AwaitingLlm | StepLimitExceeded) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(TurnPhase::AwaitingLlm.can_transition_to(TurnPhase::ToolCallsRequested));
        assert!(TurnPhase::AwaitingToolResults.can_transition_to(TurnPhase::AwaitingLlm));
        assert!(!TurnPhase::Done.can_transition_to(TurnPhase::AwaitingLlm));
        assert!(!TurnPhase::Done.can_transition_to(TurnPhase::Cancelled));
        assert!(TurnPhase::StepLimitExceeded.is_terminal());
    }
}
