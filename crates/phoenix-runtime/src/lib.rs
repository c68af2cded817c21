//! Phoenix 运行时
//! Phoenix runtime
//!
//! 内核契约的进程内实现，以及把热重载子系统接入其中的上下文对象。
//! In-process implementations of the kernel contracts, plus the context
//! object that wires the hot-reload subsystem onto them.
//!
//! - [`AgentRegistry`]: 实现 [`Orchestrator`](phoenix_kernel::Orchestrator) / implements the orchestrator contract
//! - [`AgentMessageBus`]: 带暂停缓冲的消息总线 / message bus with pause buffers
//! - [`RuntimeConfig`]: 运行时配置 / runtime configuration
//! - [`RuntimeContext`]: 启动与关闭 / explicit start and shutdown

pub mod agent;
pub mod bus;
pub mod config;
pub mod context;
pub mod logging;

pub use agent::AgentRegistry;
pub use bus::AgentMessageBus;
pub use config::{BridgeSettings, LoggingConfig, ReloadSettings, RuntimeConfig};
pub use context::RuntimeContext;
pub use logging::init_tracing;

// Re-export the layers below
pub use phoenix_kernel as kernel;
pub use phoenix_reload as reload;
