//! Agent 管理模块
//! Agent management module

pub mod registry;

pub use registry::AgentRegistry;
