//! Agent 注册中心
//! Agent registry
//!
//! 进程内的 [`Orchestrator`] 实现：按名称持有 Agent 实例及其生命周期状态。
//! In-process [`Orchestrator`]: holds agent instances and their lifecycle
//! state by name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_kernel::{Agent, AgentError, AgentHandle, AgentResult, AgentState, Orchestrator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Agent 注册条目
/// Agent registry entry
struct AgentEntry {
    handle: AgentHandle,
    registered_at: DateTime<Utc>,
}

/// Agent 注册中心
/// Agent registry
///
/// # 示例
/// # Example
///
/// ```rust,ignore
/// use phoenix_runtime::AgentRegistry;
/// use phoenix_kernel::Orchestrator;
///
/// let registry = AgentRegistry::new();
/// registry.register_agent(Box::new(solomon)).await?;
/// registry.start_agent("solomon").await?;
///
/// let handle = registry.lookup_agent("solomon").await;
/// ```
#[derive(Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentEntry>>>,
}

impl AgentRegistry {
    /// 创建新的注册中心
    /// Create a new registry
    pub fn new() -> Self {
        Self::default()
    }

    /// 注销 Agent，运行中的实例不能注销
    /// Unregister an agent; a running instance cannot be removed
    pub async fn unregister(&self, name: &str) -> AgentResult<()> {
        let mut agents = self.agents.write().await;
        match agents.get(name) {
            None => Err(AgentError::NotFound(name.to_string())),
            Some(entry) if entry.handle.status.is_running() => {
                Err(AgentError::AlreadyRunning(name.to_string()))
            }
            Some(_) => {
                agents.remove(name);
                info!("Unregistered agent {}", name);
                Ok(())
            }
        }
    }

    /// 获取 Agent 状态
    /// Get an agent's lifecycle state
    pub async fn status(&self, name: &str) -> Option<AgentState> {
        self.agents.read().await.get(name).map(|e| e.handle.status.clone())
    }

    /// 注册时间
    /// Registration time of the current instance
    pub async fn registered_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.agents.read().await.get(name).map(|e| e.registered_at)
    }

    /// 列出所有 Agent 名称
    /// List all agent names
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 列出运行中的 Agent
    /// List running agents
    pub async fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .await
            .values()
            .filter(|e| e.handle.status.is_running())
            .map(|e| e.handle.name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// 优雅停止所有运行中的 Agent
    /// Gracefully stop every running agent
    pub async fn stop_all(&self) -> Vec<(String, AgentError)> {
        let mut failures = Vec::new();
        for name in self.running().await {
            if let Err(e) = self.stop_agent(&name, true).await {
                warn!("Failed to stop agent {}: {}", name, e);
                failures.push((name, e));
            }
        }
        failures
    }

    async fn set_status(&self, name: &str, status: AgentState) -> AgentResult<()> {
        let mut agents = self.agents.write().await;
        let entry = agents
            .get_mut(name)
            .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
        debug!("Agent {}: {} -> {}", name, entry.handle.status, status);
        entry.handle.status = status;
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for AgentRegistry {
    async fn lookup_agent(&self, name: &str) -> Option<AgentHandle> {
        self.agents.read().await.get(name).map(|e| e.handle.clone())
    }

    async fn stop_agent(&self, name: &str, graceful: bool) -> AgentResult<()> {
        // the registry lock is not held while the agent stops
        let instance = {
            let mut agents = self.agents.write().await;
            let entry = agents
                .get_mut(name)
                .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
            match entry.handle.status {
                AgentState::Stopped | AgentState::Created => {
                    entry.handle.status = AgentState::Stopped;
                    return Ok(());
                }
                _ => {}
            }
            entry.handle.status = AgentState::Stopping;
            entry.handle.instance.clone()
        };

        if graceful {
            if let Err(e) = instance.write().await.stop().await {
                warn!("Agent {} failed to stop: {}", name, e);
                self.set_status(name, AgentState::Failed(e.to_string())).await?;
                return Err(AgentError::StopFailed(format!("{}: {}", name, e)));
            }
        } else {
            warn!("Force-stopping agent {}", name);
        }

        self.set_status(name, AgentState::Stopped).await?;
        info!("Agent {} stopped", name);
        Ok(())
    }

    async fn start_agent(&self, name: &str) -> AgentResult<()> {
        let instance = {
            let mut agents = self.agents.write().await;
            let entry = agents
                .get_mut(name)
                .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
            if entry.handle.status.is_running() {
                return Ok(());
            }
            let next = entry.handle.status.transition_to(AgentState::Starting)?;
            entry.handle.status = next;
            entry.handle.instance.clone()
        };

        if let Err(e) = instance.write().await.start().await {
            self.set_status(name, AgentState::Failed(e.to_string())).await?;
            return Err(AgentError::StartFailed(format!("{}: {}", name, e)));
        }

        self.set_status(name, AgentState::Running).await?;
        info!("Agent {} started", name);
        Ok(())
    }

    async fn register_agent(&self, agent: Box<dyn Agent>) -> AgentResult<()> {
        let name = agent.name().to_string();
        let mut agents = self.agents.write().await;

        if let Some(existing) = agents.get(&name) {
            match existing.handle.status {
                AgentState::Created | AgentState::Stopped | AgentState::Failed(_) => {
                    debug!("Replacing stopped instance of agent {}", name);
                }
                _ => return Err(AgentError::AlreadyRunning(name)),
            }
        }

        agents.insert(
            name.clone(),
            AgentEntry {
                handle: AgentHandle {
                    name: name.clone(),
                    status: AgentState::Created,
                    instance: Arc::new(RwLock::new(agent)),
                },
                registered_at: Utc::now(),
            },
        );
        info!("Registered agent {}", name);
        Ok(())
    }
}
