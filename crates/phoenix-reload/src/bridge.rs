//! Agent state bridge
//!
//! Turns a committed code switch into state-preserving agent swaps. For each
//! agent bound to a committed unit the bridge runs, strictly in order:
//!
//! ```text
//! lookup -> snapshot -> pause -> stop -> resolve -> instantiate
//!        -> restore -> register + start -> resume
//! ```
//!
//! Agents of one commit are swapped concurrently. A failure while stopping,
//! resolving, instantiating or starting leaves that agent stopped with its
//! traffic still buffered; it is reported through [`AgentStateBridge::offline_agents`]
//! together with the abandoned snapshot. A failed restore only degrades the
//! agent to a cold start.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use phoenix_kernel::{Agent, MessageBus, Orchestrator, ReloadEvent, StateMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::coordinator::{CommitEvent, ReloadCoordinator};
use crate::error::{ReloadError, ReloadResult};
use crate::manifest::AgentManifest;
use crate::snapshot::{AbandonedSnapshot, AgentSnapshot, SnapshotStore};

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bounded wait for a graceful stop, and again for the forced stop
    pub stop_timeout: Duration,
    /// Bounded wait for the new instance to start
    pub start_timeout: Duration,
    /// Commit reports kept for the status API
    pub max_reports: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(3_000),
            start_timeout: Duration::from_millis(3_000),
            max_reports: 50,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_max_reports(mut self, max: usize) -> Self {
        self.max_reports = max;
        self
    }
}

/// What happened to one agent during a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// Replaced; `state_restored` is false for a cold start
    Reloaded { state_restored: bool },
    /// Left stopped with traffic buffered
    Offline { error: String },
    /// Swap aborted before the old instance was stopped
    Unchanged { error: String },
    /// Not live, nothing to swap
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: String,
    pub unit_id: String,
    pub outcome: AgentOutcome,
    /// Messages flushed to the new instance on resume
    pub flushed_messages: usize,
    pub duration_ms: u64,
}

impl AgentReport {
    pub fn is_reloaded(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Reloaded { .. })
    }
}

/// Outcome of one commit across all affected agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeReport {
    pub transaction_id: String,
    pub unit_ids: Vec<String>,
    pub agents: Vec<AgentReport>,
    pub completed_at: DateTime<Utc>,
}

impl BridgeReport {
    pub fn agent(&self, name: &str) -> Option<&AgentReport> {
        self.agents.iter().find(|a| a.agent == name)
    }
}

/// An agent left stopped after a failed swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAgent {
    pub agent: String,
    pub unit_id: String,
    pub error: String,
    pub snapshot: Option<AbandonedSnapshot>,
    pub since: DateTime<Utc>,
}

/// Swaps live agents when their units are committed
pub struct AgentStateBridge {
    config: BridgeConfig,
    coordinator: Arc<ReloadCoordinator>,
    manifest: Arc<AgentManifest>,
    orchestrator: Arc<dyn Orchestrator>,
    bus: Arc<dyn MessageBus>,
    snapshots: SnapshotStore,
    offline: RwLock<BTreeMap<String, OfflineAgent>>,
    reports: RwLock<VecDeque<BridgeReport>>,
}

impl AgentStateBridge {
    pub fn new(
        config: BridgeConfig,
        coordinator: Arc<ReloadCoordinator>,
        manifest: Arc<AgentManifest>,
        orchestrator: Arc<dyn Orchestrator>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            config,
            coordinator,
            manifest,
            orchestrator,
            bus,
            snapshots: SnapshotStore::new(),
            offline: RwLock::new(BTreeMap::new()),
            reports: RwLock::new(VecDeque::new()),
        }
    }

    pub fn manifest(&self) -> Arc<AgentManifest> {
        self.manifest.clone()
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn offline_agents(&self) -> Vec<OfflineAgent> {
        self.offline.read().values().cloned().collect()
    }

    pub fn is_offline(&self, agent: &str) -> bool {
        self.offline.read().contains_key(agent)
    }

    /// Most recent commit reports, oldest first
    pub fn reports(&self) -> Vec<BridgeReport> {
        self.reports.read().iter().cloned().collect()
    }

    /// Subscribe to coordinator commits and start the worker draining them
    ///
    /// Only committed transactions reach the bridge; the listener enqueues
    /// and swaps run on the worker task. Must be called from within a tokio
    /// runtime.
    pub fn attach(self: &Arc<Self>) -> BridgeHandle {
        let (commit_tx, mut commit_rx) = mpsc::unbounded_channel::<CommitEvent>();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        self.coordinator.register_commit_listener(move |event| {
            if commit_tx.send(event.clone()).is_err() {
                warn!(
                    "Agent state bridge is not running; commit {} leaves agents untouched",
                    event.transaction_id
                );
            }
        });

        let bridge = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Agent state bridge started");
            loop {
                tokio::select! {
                    Some(event) = commit_rx.recv() => {
                        bridge.process_commit(&event).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("Agent state bridge stopped");
        });

        BridgeHandle {
            shutdown_tx,
            handle,
        }
    }

    /// Swap every live agent bound to the committed units
    pub async fn process_commit(&self, event: &CommitEvent) -> BridgeReport {
        let mut affected: Vec<(String, String)> = Vec::new();
        for unit_id in &event.unit_ids {
            for agent in self.manifest.agents_for(unit_id) {
                if !affected.iter().any(|(a, _)| *a == agent) {
                    affected.push((agent, unit_id.clone()));
                }
            }
        }

        if affected.is_empty() {
            debug!("Commit {} affects no agents", event.transaction_id);
        } else {
            info!(
                "Commit {} swapping {} agent(s)",
                event.transaction_id,
                affected.len()
            );
        }

        let agents = join_all(
            affected
                .iter()
                .map(|(agent, unit_id)| self.reload_agent(agent, unit_id)),
        )
        .await;

        let tracker = self.coordinator.tracker();
        let mut live: HashMap<&str, usize> = HashMap::new();
        for report in &agents {
            let count = live.entry(report.unit_id.as_str()).or_default();
            if report.is_reloaded() {
                *count += 1;
            }
        }
        for (unit_id, count) in live {
            tracker.set_instance_count(unit_id, count);
        }

        let report = BridgeReport {
            transaction_id: event.transaction_id.clone(),
            unit_ids: event.unit_ids.clone(),
            agents,
            completed_at: Utc::now(),
        };

        let mut reports = self.reports.write();
        reports.push_back(report.clone());
        while reports.len() > self.config.max_reports {
            reports.pop_front();
        }
        report
    }

    /// Swap a single agent
    pub async fn reload_agent(&self, agent: &str, unit_id: &str) -> AgentReport {
        let started = Instant::now();
        let (outcome, flushed_messages) = self.swap(agent, unit_id).await;
        AgentReport {
            agent: agent.to_string(),
            unit_id: unit_id.to_string(),
            outcome,
            flushed_messages,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn swap(&self, agent: &str, unit_id: &str) -> (AgentOutcome, usize) {
        // 1. lookup
        let Some(handle) = self.orchestrator.lookup_agent(agent).await else {
            debug!("Agent {} is not registered; nothing to swap", agent);
            return (
                AgentOutcome::Skipped {
                    reason: "agent not registered".to_string(),
                },
                0,
            );
        };

        // 2. snapshot, reusing the abandoned one when retrying an offline agent
        let previous_failure = self.offline.write().remove(agent);
        let snapshot = match previous_failure.and_then(|o| o.snapshot) {
            Some(abandoned) => {
                info!("Retrying offline agent {} with its abandoned snapshot", agent);
                self.snapshots.reclaim(&abandoned.snapshot).await;
                abandoned.snapshot
            }
            None => {
                let exported = handle.instance.read().await.export_state().await;
                let custom_state = exported.unwrap_or_else(|e| {
                    warn!("Agent {} state export failed, capturing status only: {}", agent, e);
                    StateMap::new()
                });
                AgentSnapshot::new(agent, handle.status.clone(), custom_state)
            }
        };
        let custom_state = snapshot.custom_state.clone();
        self.snapshots.capture(snapshot).await;
        self.coordinator.emit(ReloadEvent::StatePreserved {
            agent: agent.to_string(),
        });

        // 3. pause
        if let Err(e) = self.bus.pause_delivery(agent).await {
            let err = ReloadError::from(e);
            warn!("Agent {} swap aborted, old instance kept: {}", agent, err);
            self.snapshots.abandon(agent, err.to_string()).await;
            return (
                AgentOutcome::Unchanged {
                    error: err.to_string(),
                },
                0,
            );
        }

        // 4-8
        let state_restored = match self.replace(agent, unit_id, custom_state).await {
            Ok(state_restored) => state_restored,
            Err(err) => return (self.mark_offline(agent, unit_id, err).await, 0),
        };

        // 9. resume
        match self.bus.resume_delivery(agent).await {
            Ok(flushed) => {
                info!(
                    "Agent {} reloaded from {} (state restored: {}, {} buffered message(s) flushed)",
                    agent, unit_id, state_restored, flushed
                );
                self.coordinator.emit(ReloadEvent::AgentReloaded {
                    agent: agent.to_string(),
                    unit_id: unit_id.to_string(),
                    state_restored,
                });
                (AgentOutcome::Reloaded { state_restored }, flushed)
            }
            Err(e) => (self.mark_offline(agent, unit_id, ReloadError::from(e)).await, 0),
        }
    }

    /// Steps 4 to 8; returns whether the snapshot was restored
    async fn replace(&self, agent: &str, unit_id: &str, custom_state: StateMap) -> ReloadResult<bool> {
        self.stop(agent).await?;

        let unit = self
            .coordinator
            .active_unit(unit_id)
            .ok_or_else(|| ReloadError::UnitNotFound(unit_id.to_string()))?;
        let (_, constructor) = self
            .manifest
            .resolve(agent)
            .ok_or_else(|| ReloadError::ConstructorNotFound {
                agent: agent.to_string(),
                unit_id: unit_id.to_string(),
            })?;

        let mut instance: Box<dyn Agent> = constructor(unit.as_ref()).map_err(|e| ReloadError::agent(agent, e))?;
        if instance.name() != agent {
            return Err(ReloadError::Agent {
                agent: agent.to_string(),
                message: format!("constructor produced agent named {}", instance.name()),
            });
        }

        let state_restored = match instance.import_state(custom_state).await {
            Ok(()) => true,
            Err(e) => {
                let err = ReloadError::StateRestore {
                    agent: agent.to_string(),
                    message: e.to_string(),
                };
                warn!("{}; continuing with a cold instance", err);
                self.snapshots.abandon(agent, err.to_string()).await;
                false
            }
        };

        self.orchestrator
            .register_agent(instance)
            .await
            .map_err(|e| ReloadError::agent(agent, e))?;
        match timeout(self.config.start_timeout, self.orchestrator.start_agent(agent)).await {
            Ok(Ok(())) => {
                // the snapshot stays active until the new instance is running
                if state_restored {
                    self.snapshots.consume(agent).await;
                    self.coordinator.emit(ReloadEvent::StateRestored {
                        agent: agent.to_string(),
                    });
                }
                Ok(state_restored)
            }
            Ok(Err(e)) => Err(ReloadError::agent(agent, e)),
            Err(_) => Err(ReloadError::Agent {
                agent: agent.to_string(),
                message: format!(
                    "did not start within {}ms",
                    self.config.start_timeout.as_millis()
                ),
            }),
        }
    }

    /// Graceful stop, then forced stop, each with a bounded wait
    async fn stop(&self, agent: &str) -> ReloadResult<()> {
        let wait = self.config.stop_timeout;
        match timeout(wait, self.orchestrator.stop_agent(agent, true)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => warn!("Graceful stop of agent {} failed, forcing: {}", agent, e),
            Err(_) => warn!(
                "Agent {} did not stop within {}ms, forcing",
                agent,
                wait.as_millis()
            ),
        }

        match timeout(wait, self.orchestrator.stop_agent(agent, false)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ReloadError::agent(agent, e)),
            Err(_) => Err(ReloadError::StopTimeout {
                agent: agent.to_string(),
                timeout_ms: wait.as_millis() as u64,
            }),
        }
    }

    async fn mark_offline(&self, agent: &str, unit_id: &str, err: ReloadError) -> AgentOutcome {
        error!(
            "Agent {} left offline after failed swap to {}: {}",
            agent, unit_id, err
        );
        let snapshot = self.snapshots.abandon(agent, err.to_string()).await;
        self.offline.write().insert(
            agent.to_string(),
            OfflineAgent {
                agent: agent.to_string(),
                unit_id: unit_id.to_string(),
                error: err.to_string(),
                snapshot,
                since: Utc::now(),
            },
        );
        self.coordinator.emit(ReloadEvent::AgentReloadFailed {
            agent: agent.to_string(),
            unit_id: unit_id.to_string(),
            error: err.to_string(),
        });
        AgentOutcome::Offline {
            error: err.to_string(),
        }
    }
}

/// Handle to the bridge worker
pub struct BridgeHandle {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl BridgeHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!("Bridge worker ended abnormally: {}", e);
        }
    }
}
