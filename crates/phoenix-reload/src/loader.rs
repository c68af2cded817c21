//! Unit loading
//!
//! A [`UnitLoader`] turns a [`TrackedUnit`] into a [`LoadedUnit`] that can be
//! placed in a deployment slot. Loads always read fresh from disk; nothing is
//! cached between transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ReloadError, ReloadResult};
use crate::tracker::{TrackedUnit, checksum};

/// Optional self-check a loaded unit exposes, used as the commit gate
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, unit: &LoadedUnit) -> ReloadResult<()>;
}

struct FnProbe<F>(F);

#[async_trait]
impl<F> HealthProbe for FnProbe<F>
where
    F: Fn(&LoadedUnit) -> Result<(), String> + Send + Sync,
{
    async fn probe(&self, unit: &LoadedUnit) -> ReloadResult<()> {
        (self.0)(unit).map_err(|message| ReloadError::health(&unit.unit_id, message))
    }
}

/// Wrap a synchronous check as a [`HealthProbe`]
pub fn probe_fn<F>(check: F) -> Arc<dyn HealthProbe>
where
    F: Fn(&LoadedUnit) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(FnProbe(check))
}

/// A unit loaded into a deployment slot
#[derive(Clone)]
pub struct LoadedUnit {
    pub unit_id: String,
    pub source: PathBuf,
    /// SHA-256 of the loaded bytes
    pub checksum: String,
    /// Raw text content
    pub content: String,
    /// Parsed definition for structured formats, `Null` otherwise
    pub definition: serde_json::Value,
    pub loaded_at: DateTime<Utc>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl LoadedUnit {
    pub fn new(unit_id: impl Into<String>, source: impl AsRef<Path>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            unit_id: unit_id.into(),
            source: source.as_ref().to_path_buf(),
            checksum: checksum(content.as_bytes()),
            content,
            definition: serde_json::Value::Null,
            loaded_at: Utc::now(),
            probe: None,
        }
    }

    pub fn with_definition(mut self, definition: serde_json::Value) -> Self {
        self.definition = definition;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn has_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// Run the unit's probe; a unit without a probe is healthy
    pub async fn health_check(&self) -> ReloadResult<()> {
        match &self.probe {
            Some(probe) => probe.probe(self).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("unit_id", &self.unit_id)
            .field("source", &self.source)
            .field("checksum", &self.checksum)
            .field("loaded_at", &self.loaded_at)
            .field("has_probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}

/// Loads units for a reload transaction
#[async_trait]
pub trait UnitLoader: Send + Sync {
    async fn load(&self, unit: &TrackedUnit) -> ReloadResult<LoadedUnit>;
}

/// Loads units from their source files
///
/// Structured formats (`json`, `toml`, `yaml`, `yml`) are parsed into a
/// JSON value; a parse failure is a load failure. Any probe registered for
/// the unit id is attached to the loaded unit.
#[derive(Default)]
pub struct FileUnitLoader {
    probes: DashMap<String, Arc<dyn HealthProbe>>,
}

impl FileUnitLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the health probe for a unit id
    pub fn register_probe(&self, unit_id: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        self.probes.insert(unit_id.into(), probe);
    }

    pub fn remove_probe(&self, unit_id: &str) -> bool {
        self.probes.remove(unit_id).is_some()
    }

    fn parse(unit_id: &str, path: &Path, content: &str) -> ReloadResult<serde_json::Value> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "json" => serde_json::from_str(content).map_err(|e| ReloadError::load(unit_id, e)),
            "toml" => toml::from_str(content).map_err(|e| ReloadError::load(unit_id, e)),
            "yaml" | "yml" => {
                serde_yaml::from_str(content).map_err(|e| ReloadError::load(unit_id, e))
            }
            _ => Ok(serde_json::Value::Null),
        }
    }
}

#[async_trait]
impl UnitLoader for FileUnitLoader {
    async fn load(&self, unit: &TrackedUnit) -> ReloadResult<LoadedUnit> {
        let bytes = tokio::fs::read(&unit.source)
            .await
            .map_err(|e| ReloadError::load(&unit.unit_id, format!("read {}: {}", unit.source.display(), e)))?;
        let sum = checksum(&bytes);
        let content = String::from_utf8(bytes)
            .map_err(|e| ReloadError::load(&unit.unit_id, format!("not valid UTF-8: {}", e)))?;
        let definition = Self::parse(&unit.unit_id, &unit.source, &content)?;

        let mut loaded = LoadedUnit::new(&unit.unit_id, &unit.source, content).with_definition(definition);
        loaded.checksum = sum;
        if let Some(probe) = self.probes.get(&unit.unit_id) {
            loaded.probe = Some(Arc::clone(probe.value()));
        }

        debug!("Loaded unit {} ({})", unit.unit_id, loaded.checksum);
        Ok(loaded)
    }
}
