//! Agent state snapshots
//!
//! Holds the state captured from an agent right before it is stopped for
//! replacement. A snapshot stays active until the replacement has restored
//! it or it is explicitly abandoned; abandoned snapshots are kept for the
//! operator and never dropped silently.

use chrono::{DateTime, Utc};
use phoenix_kernel::{AgentState, StateMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// State captured from an agent before replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_name: String,
    /// Lifecycle state at capture time
    pub captured_status: AgentState,
    /// Opaque state returned by the agent's export hook
    pub custom_state: StateMap,
    pub captured_at: DateTime<Utc>,
}

impl AgentSnapshot {
    pub fn new(agent_name: impl Into<String>, captured_status: AgentState, custom_state: StateMap) -> Self {
        Self {
            agent_name: agent_name.into(),
            captured_status,
            custom_state,
            captured_at: Utc::now(),
        }
    }

    /// Typed accessor into the custom state
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.custom_state
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A snapshot whose restore never happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedSnapshot {
    pub snapshot: AgentSnapshot,
    pub reason: String,
    pub abandoned_at: DateTime<Utc>,
}

/// Snapshot bookkeeping for the bridge
pub struct SnapshotStore {
    /// Unconsumed snapshots by agent name
    active: Arc<RwLock<HashMap<String, AgentSnapshot>>>,
    /// Consumed snapshots per agent, oldest first
    history: Arc<RwLock<HashMap<String, Vec<AgentSnapshot>>>>,
    abandoned: Arc<RwLock<Vec<AbandonedSnapshot>>>,
    max_history: usize,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            abandoned: Arc::new(RwLock::new(Vec::new())),
            max_history: 10,
        }
    }

    /// Set maximum history entries per agent
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Store a freshly captured snapshot
    pub async fn capture(&self, snapshot: AgentSnapshot) {
        let agent = snapshot.agent_name.clone();
        debug!("Capturing snapshot for agent {}", agent);

        let mut active = self.active.write().await;
        if let Some(stale) = active.insert(agent.clone(), snapshot) {
            warn!("Replacing unconsumed snapshot for agent {}", agent);
            self.abandoned.write().await.push(AbandonedSnapshot {
                snapshot: stale,
                reason: "superseded by a newer snapshot".to_string(),
                abandoned_at: Utc::now(),
            });
        }
    }

    /// The unconsumed snapshot for an agent
    pub async fn get(&self, agent: &str) -> Option<AgentSnapshot> {
        self.active.read().await.get(agent).cloned()
    }

    /// Mark the snapshot restored and move it to history
    pub async fn consume(&self, agent: &str) -> Option<AgentSnapshot> {
        let snapshot = self.active.write().await.remove(agent)?;

        let mut history = self.history.write().await;
        let entry = history.entry(agent.to_string()).or_default();
        entry.push(snapshot.clone());
        if entry.len() > self.max_history {
            let to_remove = entry.len() - self.max_history;
            entry.drain(0..to_remove);
        }
        Some(snapshot)
    }

    /// Give up on restoring an agent's snapshot
    pub async fn abandon(&self, agent: &str, reason: impl Into<String>) -> Option<AbandonedSnapshot> {
        let snapshot = self.active.write().await.remove(agent)?;
        let abandoned = AbandonedSnapshot {
            snapshot,
            reason: reason.into(),
            abandoned_at: Utc::now(),
        };
        info!("Abandoned snapshot for agent {}: {}", agent, abandoned.reason);
        self.abandoned.write().await.push(abandoned.clone());
        Some(abandoned)
    }

    /// Take an abandoned snapshot back for another restore attempt
    ///
    /// Returns false when the snapshot is not on the abandoned list.
    pub async fn reclaim(&self, snapshot: &AgentSnapshot) -> bool {
        let mut abandoned = self.abandoned.write().await;
        match abandoned.iter().position(|a| a.snapshot == *snapshot) {
            Some(index) => {
                abandoned.remove(index);
                debug!("Reclaimed abandoned snapshot for agent {}", snapshot.agent_name);
                true
            }
            None => false,
        }
    }

    pub async fn history(&self, agent: &str) -> Vec<AgentSnapshot> {
        self.history.read().await.get(agent).cloned().unwrap_or_default()
    }

    pub async fn abandoned(&self) -> Vec<AbandonedSnapshot> {
        self.abandoned.read().await.clone()
    }

    pub async fn pending_agents(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }
}
