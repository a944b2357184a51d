//! 任务调度：工具并发池
//!
//! 同一步内的工具调用并行派发，Semaphore 限制同时在途的调用数。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// 工具并发限制（默认 4）
    tool_semaphore: Arc<Semaphore>,
    max_concurrent_tools: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let max_concurrent_tools = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent_tools)),
            max_concurrent_tools,
        }
    }

    /// 获取工具执行许可；信号量被关闭时返回 None
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        self.tool_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn available_permits(&self) -> usize {
        self.tool_semaphore.available_permits()
    }

    pub fn max_concurrent_tools(&self) -> usize {
        self.max_concurrent_tools
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
