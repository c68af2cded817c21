//! Agent manifest
//!
//! Static mapping from unit ids to the agents built from them. Each agent
//! name is bound to exactly one unit and one constructor; the bridge resolves
//! constructors here instead of searching loaded code for a matching type.

use parking_lot::RwLock;
use phoenix_kernel::{Agent, AgentResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::loader::LoadedUnit;

/// Builds a fresh agent instance from the active copy of its unit
pub type AgentConstructor = Arc<dyn Fn(&LoadedUnit) -> AgentResult<Box<dyn Agent>> + Send + Sync>;

#[derive(Clone)]
struct Binding {
    unit_id: String,
    constructor: AgentConstructor,
}

/// unit id -> agent names, agent name -> constructor
#[derive(Default)]
pub struct AgentManifest {
    agents_by_unit: RwLock<BTreeMap<String, BTreeSet<String>>>,
    bindings: RwLock<BTreeMap<String, Binding>>,
}

impl AgentManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `agent_name` to `unit_id`, replacing any earlier binding of that agent
    pub fn register<F>(&self, unit_id: impl Into<String>, agent_name: impl Into<String>, constructor: F)
    where
        F: Fn(&LoadedUnit) -> AgentResult<Box<dyn Agent>> + Send + Sync + 'static,
    {
        let unit_id = unit_id.into();
        let agent_name = agent_name.into();

        let previous = self.bindings.write().insert(
            agent_name.clone(),
            Binding {
                unit_id: unit_id.clone(),
                constructor: Arc::new(constructor),
            },
        );

        let mut agents_by_unit = self.agents_by_unit.write();
        if let Some(old) = previous {
            if let Some(agents) = agents_by_unit.get_mut(&old.unit_id) {
                agents.remove(&agent_name);
            }
            debug!("Rebinding agent {} from unit {}", agent_name, old.unit_id);
        }
        agents_by_unit
            .entry(unit_id.clone())
            .or_default()
            .insert(agent_name.clone());
        info!("Agent {} bound to unit {}", agent_name, unit_id);
    }

    pub fn unregister(&self, agent_name: &str) -> bool {
        let Some(binding) = self.bindings.write().remove(agent_name) else {
            return false;
        };
        if let Some(agents) = self.agents_by_unit.write().get_mut(&binding.unit_id) {
            agents.remove(agent_name);
        }
        true
    }

    /// Agents built from `unit_id`
    pub fn agents_for(&self, unit_id: &str) -> Vec<String> {
        self.agents_by_unit
            .read()
            .get(unit_id)
            .map(|agents| agents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unit_for(&self, agent_name: &str) -> Option<String> {
        self.bindings.read().get(agent_name).map(|b| b.unit_id.clone())
    }

    /// Unit id and constructor for `agent_name`
    pub fn resolve(&self, agent_name: &str) -> Option<(String, AgentConstructor)> {
        self.bindings
            .read()
            .get(agent_name)
            .map(|b| (b.unit_id.clone(), b.constructor.clone()))
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

impl fmt::Debug for AgentManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentManifest")
            .field("agents_by_unit", &*self.agents_by_unit.read())
            .finish_non_exhaustive()
    }
}
