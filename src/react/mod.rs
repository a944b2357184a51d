//! 推理层：Planner、事件、主循环与回复

pub mod events;
pub mod loop_;
pub mod planner;
pub mod reply;

pub use events::ReactEvent;
pub use loop_::{react_loop, ReactSession, DEFAULT_MAX_STEPS};
pub use planner::{normalize_call_ids, Planner};
pub use reply::{AssistantReply, ReplyStatus, ToolCallSummary};
