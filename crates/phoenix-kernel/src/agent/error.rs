//! Agent 错误类型定义
//! Agent error type definitions

use thiserror::Error;

/// Agent 操作结果类型
/// Agent operation result type
pub type AgentResult<T> = Result<T, AgentError>;

/// Agent 错误类型
/// Agent error type
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// Agent 未找到
    /// Agent not found
    #[error("Agent not found: {0}")]
    NotFound(String),

    /// Agent 已注册且仍在运行
    /// Agent already registered and still running
    #[error("Agent already running: {0}")]
    AlreadyRunning(String),

    /// 启动失败
    /// Start failed
    #[error("Agent start failed: {0}")]
    StartFailed(String),

    /// 停止失败
    /// Stop failed
    #[error("Agent stop failed: {0}")]
    StopFailed(String),

    /// 消息处理失败
    /// Message handling failed
    #[error("Message handling failed: {0}")]
    HandleFailed(String),

    /// 状态导出/导入失败
    /// State export/import failed
    #[error("State transfer failed: {0}")]
    StateTransfer(String),

    /// 健康检查失败
    /// Health check failed
    #[error("Health check failed: {0}")]
    Unhealthy(String),

    /// 无效状态转换
    /// Invalid state transition
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// 超时错误
    /// Timeout
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// 注册失败
    /// Registration failed
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// 序列化错误
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 内部错误
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// 创建状态转换错误
    /// Create a state transition error
    pub fn invalid_state_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// 创建超时错误
    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}
