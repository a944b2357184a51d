//! 记忆层：对话消息、会话分区存储、保留策略

pub mod conversation;
pub mod retention;
pub mod session_store;
pub mod token_budget;

pub use conversation::{Message, Role};
pub use retention::{trim_messages, RetentionPolicy};
pub use session_store::{Session, SessionGuard, SessionId, SessionMemory};
pub use token_budget::TokenEstimator;
