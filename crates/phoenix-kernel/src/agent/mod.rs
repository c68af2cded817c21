//! 统一 Agent 接口
//! Unified Agent interface
//!
//! 每个可热替换的 Agent 都实现 [`Agent`]。能力集合固定为
//! 生命周期、状态导出、状态导入和健康检查，全部带有默认空实现，
//! 因此任何 Agent 类型都静态满足契约，而不是在运行时探测方法是否存在。
//!
//! Every hot-swappable agent implements [`Agent`]. The capability set is
//! fixed to lifecycle, state export, state import and health check, each
//! with a no-op default, so every agent type satisfies the contract
//! statically instead of being probed at runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Agent (trait)                      │
//! │  • name(), state()                                       │
//! │  • start(), stop()              (lifecycle, default no-op)│
//! │  • handle_message()                                      │
//! │  • export_state(), import_state()  (state, default no-op) │
//! │  • health_check()               (default healthy)         │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod error;

pub use error::{AgentError, AgentResult};

use crate::message::AgentMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Agent 导出的不透明状态
/// Opaque state exported by an agent
pub type StateMap = HashMap<String, serde_json::Value>;

/// 运行时共享的 Agent 实例
/// Agent instance shared across the runtime
pub type SharedAgent = Arc<RwLock<Box<dyn Agent>>>;

// ============================================================================
// Agent 状态
// Agent State
// ============================================================================

/// Agent 生命周期状态
/// Agent lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgentState {
    /// 已创建，未启动
    /// Created, not started
    #[default]
    Created,
    /// 正在启动
    /// Starting
    Starting,
    /// 运行中
    /// Running
    Running,
    /// 正在停止
    /// Stopping
    Stopping,
    /// 已停止
    /// Stopped
    Stopped,
    /// 失败 (带消息)
    /// Failed (with message)
    Failed(String),
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Created => write!(f, "Created"),
            AgentState::Starting => write!(f, "Starting"),
            AgentState::Running => write!(f, "Running"),
            AgentState::Stopping => write!(f, "Stopping"),
            AgentState::Stopped => write!(f, "Stopped"),
            AgentState::Failed(msg) => write!(f, "Failed({})", msg),
        }
    }
}

impl AgentState {
    /// 检查是否可以转换到目标状态
    /// Check if transition to target is possible
    pub fn can_transition_to(&self, target: &AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, target),
            (Created, Starting)
                | (Starting, Running)
                | (Starting, Failed(_))
                | (Running, Stopping)
                | (Running, Failed(_))
                | (Stopping, Stopped)
                | (Stopping, Failed(_))
                | (Stopped, Starting)
                | (Failed(_), Starting)
                | (Failed(_), Stopped)
        )
    }

    /// 转换到目标状态
    /// Transition to target state
    pub fn transition_to(&self, target: AgentState) -> AgentResult<AgentState> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(AgentError::invalid_state_transition(self, &target))
        }
    }

    /// 是否可以处理消息
    /// Whether the agent can process messages
    pub fn is_running(&self) -> bool {
        matches!(self, AgentState::Running)
    }
}

// ============================================================================
// Agent - 统一核心接口
// Agent - unified core interface
// ============================================================================

/// 可热替换 Agent 的统一接口
/// Unified interface for hot-swappable agents
///
/// # 示例
/// # Example
///
/// ```rust,ignore
/// use phoenix_kernel::agent::{Agent, AgentResult, StateMap};
/// use phoenix_kernel::AgentMessage;
///
/// struct Counter { counter: u64 }
///
/// #[async_trait]
/// impl Agent for Counter {
///     fn name(&self) -> &str { "counter" }
///
///     async fn handle_message(&mut self, _message: AgentMessage) -> AgentResult<()> {
///         self.counter += 1;
///         Ok(())
///     }
///
///     async fn export_state(&self) -> AgentResult<StateMap> {
///         Ok(StateMap::from([("counter".to_string(), self.counter.into())]))
///     }
/// }
/// ```
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// 获取 Agent 名称，在注册中心内唯一
    /// Agent name, unique within the registry
    fn name(&self) -> &str;

    /// 获取 Agent 自报告的状态
    /// Self-reported agent state
    fn state(&self) -> AgentState {
        AgentState::Running
    }

    /// 启动 Agent
    /// Start the agent
    async fn start(&mut self) -> AgentResult<()> {
        Ok(())
    }

    /// 优雅停止 Agent
    /// Gracefully stop the agent
    async fn stop(&mut self) -> AgentResult<()> {
        Ok(())
    }

    /// 处理一条投递给该 Agent 的消息
    /// Handle one message delivered to this agent
    async fn handle_message(&mut self, message: AgentMessage) -> AgentResult<()>;

    /// 导出需要跨重载保留的状态
    /// Export state that must survive a reload
    async fn export_state(&self) -> AgentResult<StateMap> {
        Ok(StateMap::new())
    }

    /// 导入上一个实例导出的状态
    /// Import state exported by the previous instance
    async fn import_state(&mut self, _state: StateMap) -> AgentResult<()> {
        Ok(())
    }

    /// 自检
    /// Self check
    async fn health_check(&self) -> AgentResult<()> {
        Ok(())
    }
}

/// 注册中心返回的 Agent 句柄
/// Agent handle returned by the registry
#[derive(Clone)]
pub struct AgentHandle {
    /// Agent 名称
    /// Agent name
    pub name: String,
    /// 注册中心记录的生命周期状态
    /// Lifecycle state recorded by the registry
    pub status: AgentState,
    /// 共享实例
    /// Shared instance
    pub instance: SharedAgent,
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
