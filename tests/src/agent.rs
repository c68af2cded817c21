use async_trait::async_trait;
use phoenix_kernel::{Agent, AgentError, AgentMessage, AgentResult, Orchestrator, StateMap};
use phoenix_reload::LoadedUnit;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::gate::Gate;

/// A message as seen by one agent instance
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub agent: String,
    /// Which instance handled it, starting at 1
    pub generation: u64,
    pub payload: Value,
}

impl Delivery {
    pub fn text(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

/// Delivery history shared by every instance of a mock agent
#[derive(Clone, Default)]
pub struct DeliveryLog(Arc<Mutex<Vec<Delivery>>>);

impl DeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, delivery: Delivery) {
        if let Ok(mut log) = self.0.lock() {
            log.push(delivery);
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn for_agent(&self, agent: &str) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.agent == agent)
            .collect()
    }

    /// Text payloads delivered to `agent`, in delivery order
    pub fn texts(&self, agent: &str) -> Vec<String> {
        self.for_agent(agent)
            .iter()
            .filter_map(|d| d.text().map(str::to_string))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.0.lock().map(|log| log.len()).unwrap_or_default()
    }
}

/// Which lifecycle hooks should fail
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_export: bool,
    pub fail_import: bool,
}

/// A scriptable agent
///
/// Text payloads are only recorded. An object payload with a `set` object is
/// also merged into the agent's state, so tests can drive state through the
/// bus:
///
/// ```rust,ignore
/// bus.send(AgentMessage::new("test", "solomon", json!({"set": {"goal_index": 2}}))).await?;
/// ```
pub struct MockAgent {
    name: String,
    generation: u64,
    state: StateMap,
    /// Definition of the unit this instance was built from
    definition: Value,
    log: DeliveryLog,
    behavior: MockBehavior,
    stop_gate: Option<Arc<Gate>>,
}

impl MockAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            generation: 1,
            state: StateMap::new(),
            definition: Value::Null,
            log: DeliveryLog::new(),
            behavior: MockBehavior::default(),
            stop_gate: None,
        }
    }

    pub fn with_state(mut self, state: StateMap) -> Self {
        self.state = state;
        self
    }

    pub fn with_log(mut self, log: DeliveryLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Block the first graceful stop until the gate is released
    pub fn with_stop_gate(mut self, gate: Arc<Gate>) -> Self {
        self.stop_gate = Some(gate);
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> AgentResult<()> {
        if self.behavior.fail_start {
            return Err(AgentError::StartFailed(self.name.clone()));
        }
        Ok(())
    }

    async fn stop(&mut self) -> AgentResult<()> {
        if let Some(gate) = &self.stop_gate {
            gate.pass().await;
        }
        if self.behavior.fail_stop {
            return Err(AgentError::StopFailed(self.name.clone()));
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: AgentMessage) -> AgentResult<()> {
        if let Some(Value::Object(updates)) = message.payload.get("set") {
            for (key, value) in updates {
                self.state.insert(key.clone(), value.clone());
            }
        }
        self.log.record(Delivery {
            agent: self.name.clone(),
            generation: self.generation,
            payload: message.payload,
        });
        Ok(())
    }

    async fn export_state(&self) -> AgentResult<StateMap> {
        if self.behavior.fail_export {
            return Err(AgentError::StateTransfer("export disabled".to_string()));
        }
        Ok(self.state.clone())
    }

    async fn import_state(&mut self, state: StateMap) -> AgentResult<()> {
        if self.behavior.fail_import {
            return Err(AgentError::StateTransfer(format!(
                "generation {} rejects the snapshot",
                self.generation
            )));
        }
        self.state = state;
        Ok(())
    }

    async fn health_check(&self) -> AgentResult<()> {
        if self.definition.get("unhealthy").and_then(Value::as_bool) == Some(true) {
            return Err(AgentError::Unhealthy(self.name.clone()));
        }
        Ok(())
    }
}

/// Builds successive [`MockAgent`] generations for an agent manifest
#[derive(Clone)]
pub struct MockAgentFactory {
    name: String,
    log: DeliveryLog,
    built: Arc<AtomicU64>,
    behavior: Arc<RwLock<MockBehavior>>,
    stop_gate: Arc<RwLock<Option<Arc<Gate>>>>,
}

impl MockAgentFactory {
    pub fn new(name: &str, log: DeliveryLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            built: Arc::new(AtomicU64::new(0)),
            behavior: Arc::new(RwLock::new(MockBehavior::default())),
            stop_gate: Arc::new(RwLock::new(None)),
        }
    }

    /// Behavior of instances built from now on
    pub fn set_behavior(&self, behavior: MockBehavior) {
        if let Ok(mut current) = self.behavior.write() {
            *current = behavior;
        }
    }

    /// Stop gate handed to the next instance built
    pub fn set_stop_gate(&self, gate: Arc<Gate>) {
        if let Ok(mut current) = self.stop_gate.write() {
            *current = Some(gate);
        }
    }

    /// Number of instances built so far
    pub fn built(&self) -> u64 {
        self.built.load(Ordering::SeqCst)
    }

    pub fn build(&self, unit: &LoadedUnit) -> AgentResult<Box<dyn Agent>> {
        let generation = self.built.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior.read().map(|b| *b).unwrap_or_default();
        let stop_gate = self.stop_gate.write().ok().and_then(|mut g| g.take());

        let mut agent = MockAgent::new(&self.name)
            .with_log(self.log.clone())
            .with_behavior(behavior);
        agent.generation = generation;
        agent.definition = unit.definition.clone();
        if let Some(gate) = stop_gate {
            agent = agent.with_stop_gate(gate);
        }
        Ok(Box::new(agent))
    }

    /// Constructor suitable for `AgentManifest::register`
    pub fn constructor(&self) -> impl Fn(&LoadedUnit) -> AgentResult<Box<dyn Agent>> + Send + Sync + 'static {
        let factory = self.clone();
        move |unit: &LoadedUnit| factory.build(unit)
    }
}

/// State exported by the instance currently registered under `name`
pub async fn live_state(orchestrator: &dyn Orchestrator, name: &str) -> Option<StateMap> {
    let handle = orchestrator.lookup_agent(name).await?;
    let instance = handle.instance.read().await;
    instance.export_state().await.ok()
}
