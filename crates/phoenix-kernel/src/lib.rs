// agent module
pub mod agent;
pub use agent::{Agent, AgentError, AgentHandle, AgentResult, AgentState, SharedAgent, StateMap};

// message module
pub mod message;
pub use message::AgentMessage;

// bus module
pub mod bus;
pub use bus::{BusError, BusResult, MessageBus};

// orchestrator module
pub mod orchestrator;
pub use orchestrator::Orchestrator;

// reload event module
pub mod reload;
pub use reload::{ReloadEvent, SlotName};

// config module
#[cfg(feature = "config")]
pub mod config;

// error module
pub mod error;
