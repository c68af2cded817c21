//! Crate-level error types for `phoenix-kernel`.
//!
//! [`KernelError`] composes the typed errors of every kernel sub-module and
//! is carried inside an [`error_stack::Report`] so wiring code can attach
//! context as failures propagate.
//!
//! ```rust,ignore
//! use error_stack::ResultExt;
//! use phoenix_kernel::error::{KernelError, KernelResult};
//!
//! fn load() -> KernelResult<RuntimeConfig> {
//!     phoenix_kernel::config::load_config("phoenix.toml")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("loading phoenix.toml")
//! }
//! ```

use crate::agent::AgentError;
use crate::bus::BusError;
use thiserror::Error;

/// Crate-level error type for `phoenix-kernel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An error originating from an agent.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// A message bus error.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// A configuration-related error.
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;

/// Extension trait to lift a typed error into [`KernelResult<T>`].
pub trait IntoKernelReport<T> {
    /// Convert the error into a [`KernelError`] and wrap it in a report.
    fn into_report(self) -> KernelResult<T>;
}

impl<T, E> IntoKernelReport<T> for Result<T, E>
where
    E: Into<KernelError>,
{
    #[inline]
    fn into_report(self) -> KernelResult<T> {
        self.map_err(|e| error_stack::Report::new(e.into()))
    }
}
