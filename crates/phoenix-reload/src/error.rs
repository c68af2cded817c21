//! Reload error taxonomy
//!
//! `Load` and `HealthCheck*` abort a whole transaction. `StateRestore` and
//! `StopTimeout` are scoped to a single agent. Lookup failures are returned
//! synchronously to the caller of a forced reload.

use phoenix_kernel::{AgentError, BusError};

pub type ReloadResult<T> = Result<T, ReloadError>;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ReloadError {
    #[error("Failed to load unit {unit_id}: {message}")]
    Load { unit_id: String, message: String },

    #[error("Health check failed for unit {unit_id}: {message}")]
    HealthCheck { unit_id: String, message: String },

    #[error("Health check phase exceeded {timeout_ms}ms")]
    HealthCheckTimeout { timeout_ms: u64 },

    #[error("State restore failed for agent {agent}: {message}")]
    StateRestore { agent: String, message: String },

    #[error("Agent {agent} did not stop within {timeout_ms}ms")]
    StopTimeout { agent: String, timeout_ms: u64 },

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("No constructor registered for agent {agent} in unit {unit_id}")]
    ConstructorNotFound { agent: String, unit_id: String },

    #[error("Agent {agent} failed: {message}")]
    Agent { agent: String, message: String },

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Commit callback failed: {0}")]
    CallbackFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReloadError {
    pub fn load(unit_id: impl Into<String>, message: impl ToString) -> Self {
        Self::Load {
            unit_id: unit_id.into(),
            message: message.to_string(),
        }
    }

    pub fn health(unit_id: impl Into<String>, message: impl ToString) -> Self {
        Self::HealthCheck {
            unit_id: unit_id.into(),
            message: message.to_string(),
        }
    }

    pub fn agent(agent: impl Into<String>, err: AgentError) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: err.to_string(),
        }
    }

    /// Unit the error is attributed to, if any
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            Self::Load { unit_id, .. }
            | Self::HealthCheck { unit_id, .. }
            | Self::ConstructorNotFound { unit_id, .. } => Some(unit_id),
            Self::UnitNotFound(unit_id) => Some(unit_id),
            _ => None,
        }
    }

    /// Named agent or unit was absent
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Self::UnitNotFound(_) | Self::AgentNotFound(_) | Self::ConstructorNotFound { .. }
        )
    }

    /// Errors that abort the whole code transaction
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            Self::Load { .. } | Self::HealthCheck { .. } | Self::HealthCheckTimeout { .. }
        )
    }
}

impl From<std::io::Error> for ReloadError {
    fn from(err: std::io::Error) -> Self {
        ReloadError::Io(err.to_string())
    }
}

impl From<BusError> for ReloadError {
    fn from(err: BusError) -> Self {
        ReloadError::Bus(err.to_string())
    }
}
