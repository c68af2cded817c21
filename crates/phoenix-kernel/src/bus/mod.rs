//! 消息总线契约
//! Message bus contract
//!
//! 热重载子系统只消费总线的暂停、缓冲、恢复能力。
//! The hot-reload subsystem only consumes pause, buffer and resume.

use crate::message::AgentMessage;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),
    #[error("Delivery to {agent} failed: {message}")]
    DeliveryFailed { agent: String, message: String },
    #[error("Agent {0} is not paused")]
    NotPaused(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Agent 消息总线
/// Agent message bus
///
/// 暂停期间发往该 Agent 的消息进入缓冲区，恢复时按到达顺序
/// 投递给当前注册的实例，然后切回直接投递。
///
/// While paused, messages for the agent are buffered; on resume they are
/// delivered in arrival order to the currently registered instance before
/// direct delivery resumes.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// 发送消息
    /// Send a message
    async fn send(&self, message: AgentMessage) -> BusResult<()>;

    /// 暂停直接投递，开始缓冲
    /// Pause direct delivery and start buffering
    async fn pause_delivery(&self, agent: &str) -> BusResult<()>;

    /// 冲刷缓冲区并恢复直接投递，返回冲刷的消息数
    /// Flush the buffer and resume direct delivery; returns the number flushed
    async fn resume_delivery(&self, agent: &str) -> BusResult<usize>;

    /// 缓冲区中的消息数
    /// Number of buffered messages
    async fn buffer_size(&self, agent: &str) -> usize;
}
