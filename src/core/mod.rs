//! 核心层：错误与恢复、轮次状态机、任务调度

pub mod error;
pub mod recovery;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::TurnPhase;
pub use task_scheduler::TaskScheduler;
