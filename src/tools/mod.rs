//! 工具层：调用请求/结果、参数校验、结果缓存、注册表与执行器

pub mod cache;
pub mod call;
pub mod executor;
pub mod registry;
pub mod schema;

pub use cache::ToolResultCache;
pub use call::{ToolCallRequest, ToolCallResult, ToolErrorKind, ToolOutcome};
pub use executor::ToolExecutor;
pub use registry::{ToolDescriptor, ToolRegistry, ToolSet};
pub use schema::validate_arguments;
