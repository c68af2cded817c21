//! 编排器契约
//! Orchestrator contract
//!
//! 热重载子系统只消费编排器的注册、启动、停止与查找能力，
//! 任务分配与网格特性不在此契约之内。
//! The hot-reload subsystem only consumes register, start, stop and lookup.

use crate::agent::{Agent, AgentHandle, AgentResult};
use async_trait::async_trait;

/// Agent 注册与生命周期
/// Agent registry and lifecycle
#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    /// 查找当前注册的实例
    /// Look up the currently registered instance
    async fn lookup_agent(&self, name: &str) -> Option<AgentHandle>;

    /// 停止实例。`graceful` 为 true 时调用 Agent 的 `stop`，否则直接标记为已停止
    /// Stop the instance. `graceful` calls the agent's `stop`; otherwise it is
    /// marked stopped without waiting on the agent.
    async fn stop_agent(&self, name: &str, graceful: bool) -> AgentResult<()>;

    /// 启动已注册的实例
    /// Start a registered instance
    async fn start_agent(&self, name: &str) -> AgentResult<()>;

    /// 注册实例，同名的已停止实例会被替换
    /// Register an instance; a stopped instance with the same name is replaced
    async fn register_agent(&self, agent: Box<dyn Agent>) -> AgentResult<()>;
}
