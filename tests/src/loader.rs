use async_trait::async_trait;
use dashmap::DashMap;
use phoenix_reload::{
    FileUnitLoader, HealthProbe, LoadedUnit, ReloadError, ReloadResult, TrackedUnit, UnitLoader,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::gate::Gate;

/// A [`FileUnitLoader`] with scripted failures and pauses
///
/// ```rust,ignore
/// let loader = Arc::new(ScriptedLoader::new());
/// loader.fail("b", "syntax error");
/// let gate = loader.gate("a");
/// ```
#[derive(Default)]
pub struct ScriptedLoader {
    inner: FileUnitLoader,
    failures: DashMap<String, String>,
    gates: DashMap<String, Arc<Gate>>,
    loads: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every load of `unit_id` until [`ScriptedLoader::heal`] is called
    pub fn fail(&self, unit_id: &str, message: &str) {
        self.failures.insert(unit_id.to_string(), message.to_string());
    }

    pub fn heal(&self, unit_id: &str) {
        self.failures.remove(unit_id);
    }

    /// Hold the next load of `unit_id` at a gate
    pub fn gate(&self, unit_id: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.gates.insert(unit_id.to_string(), gate.clone());
        gate
    }

    pub fn register_probe(&self, unit_id: &str, probe: Arc<dyn HealthProbe>) {
        self.inner.register_probe(unit_id, probe);
    }

    /// Unit ids in load order
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn load_count(&self, unit_id: &str) -> usize {
        self.loads().iter().filter(|id| *id == unit_id).count()
    }
}

#[async_trait]
impl UnitLoader for ScriptedLoader {
    async fn load(&self, unit: &TrackedUnit) -> ReloadResult<LoadedUnit> {
        if let Ok(mut loads) = self.loads.lock() {
            loads.push(unit.unit_id.clone());
        }

        let gate = self.gates.remove(&unit.unit_id).map(|(_, gate)| gate);
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let failure = self.failures.get(&unit.unit_id).map(|m| m.clone());
        if let Some(message) = failure {
            return Err(ReloadError::load(&unit.unit_id, message));
        }
        self.inner.load(unit).await
    }
}

/// A probe that always fails
pub struct FailingProbe {
    message: String,
}

impl FailingProbe {
    pub fn new(message: &str) -> Arc<dyn HealthProbe> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl HealthProbe for FailingProbe {
    async fn probe(&self, unit: &LoadedUnit) -> ReloadResult<()> {
        Err(ReloadError::health(&unit.unit_id, &self.message))
    }
}

/// A probe that succeeds after a delay
pub struct SlowProbe {
    delay: Duration,
}

impl SlowProbe {
    pub fn new(delay: Duration) -> Arc<dyn HealthProbe> {
        Arc::new(Self { delay })
    }
}

#[async_trait]
impl HealthProbe for SlowProbe {
    async fn probe(&self, _unit: &LoadedUnit) -> ReloadResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
