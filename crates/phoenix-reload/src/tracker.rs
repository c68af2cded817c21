//! Change tracking for reloadable units
//!
//! The tracker is the only owner of [`TrackedUnit`] records. It walks the
//! configured roots, keeps a checksum per unit and reports which units have
//! drifted from the last committed checksum. Modification time is only a
//! pre-filter: a unit is dirty when its content hash changes, never because
//! its mtime moved.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ReloadError, ReloadResult};

/// Tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Source roots to walk
    pub roots: Vec<PathBuf>,
    /// Eligible file extensions (empty = every extension)
    pub extensions: Vec<String>,
    /// Ignore patterns: `*suffix`, `prefix*` or an exact file name
    pub exclude: Vec<String>,
    /// Walk subdirectories
    pub recursive: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extensions: ["toml", "json", "yaml", "yml", "rhai", "md"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            exclude: ["*.tmp", "*.swp", "*~", ".#*"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            recursive: true,
        }
    }
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source root
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.roots.push(root.as_ref().to_path_buf());
        self
    }

    /// Add an eligible extension
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extensions.push(ext.to_string());
        self
    }

    /// Add an ignore pattern
    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(pattern.to_string());
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Check if a file is a trackable unit
    pub fn is_eligible(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.is_empty() && !self.extensions.iter().any(|e| e == ext) {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self.exclude.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                file_name.ends_with(suffix)
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                file_name.starts_with(prefix)
            } else {
                file_name == pattern
            }
        })
    }
}

/// A trackable, independently reloadable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedUnit {
    /// Unit id: path relative to its root, extension stripped, `/`-separated
    pub unit_id: String,
    /// Source file
    pub source: PathBuf,
    /// Last observed modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Checksum of the committed (active) content; `None` until first commit
    pub content_checksum: Option<String>,
    /// Monotonic version, bumped on every committed checksum change
    pub version: u64,
    /// When the committed content was loaded
    pub loaded_at: Option<DateTime<Utc>>,
    /// Live agent instances built from this unit
    pub instance_count: usize,
    /// Number of I/O, load or health failures
    pub error_count: u64,
    /// Most recent failure
    pub last_error: Option<String>,
}

impl TrackedUnit {
    fn new(unit_id: &str, source: &Path) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            source: source.to_path_buf(),
            last_modified: None,
            content_checksum: None,
            version: 0,
            loaded_at: None,
            instance_count: 0,
            error_count: 0,
            last_error: None,
        }
    }
}

/// Tracker bookkeeping around a unit
#[derive(Debug, Clone)]
struct UnitEntry {
    unit: TrackedUnit,
    observed_mtime: Option<SystemTime>,
    observed_checksum: Option<String>,
    /// Checksum of the last failed attempt; suppresses re-emission
    attempted_checksum: Option<String>,
    /// I/O error still standing from the last observation
    io_error: Option<String>,
}

impl UnitEntry {
    fn is_dirty(&self) -> bool {
        self.observed_checksum.is_some() && self.observed_checksum != self.unit.content_checksum
    }

    fn is_pending(&self) -> bool {
        self.is_dirty() && self.observed_checksum != self.attempted_checksum
    }

    fn record_error(&mut self, message: String) {
        self.unit.error_count += 1;
        self.unit.last_error = Some(message);
    }

    /// Record an I/O error; false when the same error is already standing
    fn note_io_error(&mut self, message: &str) -> bool {
        if self.io_error.as_deref() == Some(message) {
            return false;
        }
        self.io_error = Some(message.to_string());
        self.record_error(message.to_string());
        true
    }
}

/// When to recompute a checksum for a known unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rehash {
    /// mtime differs from the last observation
    OnMtimeChange,
    /// mtime is newer than the last observation
    OnMtimeIncrease,
    /// unconditionally
    Always,
}

/// Result of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Units seen for the first time
    pub discovered: Vec<String>,
    /// Known units whose checksum changed during this scan
    pub changed: Vec<String>,
    /// Units skipped because of I/O errors, with the error message
    pub errors: Vec<(String, String)>,
    /// Eligible files visited
    pub scanned: usize,
}

/// SHA-256 of a byte slice, lowercase hex
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn to_datetime(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Authoritative unit registry and drift detector
pub struct ChangeTracker {
    config: TrackerConfig,
    units: RwLock<BTreeMap<String, UnitEntry>>,
}

impl ChangeTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            units: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Walk every root and create or refresh units
    ///
    /// Idempotent: with no file changes a second scan reports nothing
    /// discovered or changed. Per-file I/O errors are recorded on the unit
    /// and never abort the scan.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut seen = Vec::new();

        for (unit_id, path) in self.discover() {
            report.scanned += 1;
            seen.push(unit_id.clone());
            self.observe(&unit_id, &path, Rehash::OnMtimeChange, &mut report);
        }

        // known units that vanished from disk
        let mut units = self.units.write();
        for (unit_id, entry) in units.iter_mut() {
            if !seen.contains(unit_id) {
                let message = format!("source missing: {}", entry.unit.source.display());
                if entry.note_io_error(&message) {
                    warn!("Unit {} skipped: {}", unit_id, message);
                }
                report.errors.push((unit_id.clone(), message));
            }
        }
        drop(units);

        info!(
            "Scan complete: {} files, {} discovered, {} changed, {} errors",
            report.scanned,
            report.discovered.len(),
            report.changed.len(),
            report.errors.len()
        );
        report
    }

    /// One poll cycle: restat known units, pick up new files and return the
    /// batch of units whose checksum differs from the last commit
    ///
    /// Checksums of known units are only recomputed when their mtime
    /// increased. A batch is only emitted when at least one dirty unit has a
    /// checksum that has not already failed a transaction; the batch then
    /// carries every dirty unit so a fixed unit is retried together with the
    /// units it originally changed with.
    pub fn poll_changes(&self) -> Vec<String> {
        let mut report = ScanReport::default();

        let known: Vec<(String, PathBuf)> = self
            .units
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.unit.source.clone()))
            .collect();
        for (unit_id, path) in &known {
            self.observe(unit_id, path, Rehash::OnMtimeIncrease, &mut report);
        }

        for (unit_id, path) in self.discover() {
            if !self.units.read().contains_key(&unit_id) {
                self.observe(&unit_id, &path, Rehash::Always, &mut report);
            }
        }

        let failed: Vec<&String> = report.errors.iter().map(|(id, _)| id).collect();
        let units = self.units.read();
        let dirty: Vec<(&String, &UnitEntry)> = units
            .iter()
            .filter(|(id, entry)| entry.is_dirty() && !failed.contains(id))
            .collect();

        if !dirty.iter().any(|(_, entry)| entry.is_pending()) {
            return Vec::new();
        }
        let batch: Vec<String> = dirty.iter().map(|(id, _)| (*id).clone()).collect();

        if !batch.is_empty() {
            debug!("Poll produced batch: {:?}", batch);
        }
        batch
    }

    /// Restat and rehash one unit unconditionally
    pub fn refresh_unit(&self, unit_id: &str) -> ReloadResult<TrackedUnit> {
        let path = self
            .units
            .read()
            .get(unit_id)
            .map(|entry| entry.unit.source.clone())
            .ok_or_else(|| ReloadError::UnitNotFound(unit_id.to_string()))?;

        let mut report = ScanReport::default();
        self.observe(unit_id, &path, Rehash::Always, &mut report);
        if let Some((_, message)) = report.errors.into_iter().next() {
            return Err(ReloadError::Io(message));
        }
        self.unit(unit_id)
            .ok_or_else(|| ReloadError::UnitNotFound(unit_id.to_string()))
    }

    fn observe(&self, unit_id: &str, path: &Path, rehash: Rehash, report: &mut ScanReport) {
        let mtime = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                self.fail(unit_id, path, format!("stat {}: {}", path.display(), e), report);
                return;
            }
        };

        let needs_hash = {
            let units = self.units.read();
            match units.get(unit_id) {
                None => true,
                Some(entry) if entry.observed_checksum.is_none() => true,
                Some(entry) => match rehash {
                    Rehash::Always => true,
                    Rehash::OnMtimeChange => entry.observed_mtime != Some(mtime),
                    Rehash::OnMtimeIncrease => entry.observed_mtime.is_none_or(|seen| mtime > seen),
                },
            }
        };
        if !needs_hash {
            self.clear_io_error(unit_id);
            return;
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(unit_id, path, format!("read {}: {}", path.display(), e), report);
                return;
            }
        };
        let sum = checksum(&bytes);

        let mut units = self.units.write();
        let entry = units.entry(unit_id.to_string()).or_insert_with(|| {
            report.discovered.push(unit_id.to_string());
            debug!("Discovered unit {} at {:?}", unit_id, path);
            UnitEntry {
                unit: TrackedUnit::new(unit_id, path),
                observed_mtime: None,
                observed_checksum: None,
                attempted_checksum: None,
                io_error: None,
            }
        });

        let previous = entry.observed_checksum.replace(sum.clone());
        if previous.is_some() && previous.as_deref() != Some(sum.as_str()) {
            debug!("Unit {} checksum changed", unit_id);
            report.changed.push(unit_id.to_string());
        }
        entry.observed_mtime = Some(mtime);
        entry.unit.last_modified = Some(to_datetime(mtime));
        if entry.io_error.take().is_some() {
            info!("Unit {} readable again", unit_id);
        }
    }

    fn clear_io_error(&self, unit_id: &str) {
        let failing = self
            .units
            .read()
            .get(unit_id)
            .is_some_and(|entry| entry.io_error.is_some());
        if !failing {
            return;
        }
        if let Some(entry) = self.units.write().get_mut(unit_id) {
            entry.io_error = None;
            info!("Unit {} readable again", unit_id);
        }
    }

    /// Counted and logged once per distinct error; a standing error is
    /// still reported so the unit stays out of the batch
    fn fail(&self, unit_id: &str, path: &Path, message: String, report: &mut ScanReport) {
        let mut units = self.units.write();
        if let Some(entry) = units.get_mut(unit_id) {
            if entry.note_io_error(&message) {
                warn!("Unit {} skipped: {}", unit_id, message);
            } else {
                debug!("Unit {} still unreadable: {}", unit_id, message);
            }
        } else {
            warn!("Unit {} skipped: {}", unit_id, message);
            // unreadable on first sight: register so the error is queryable
            let mut unit = TrackedUnit::new(unit_id, path);
            unit.error_count = 1;
            unit.last_error = Some(message.clone());
            units.insert(
                unit_id.to_string(),
                UnitEntry {
                    unit,
                    observed_mtime: None,
                    observed_checksum: None,
                    attempted_checksum: None,
                    io_error: Some(message.clone()),
                },
            );
        }
        report.errors.push((unit_id.to_string(), message));
    }

    /// Eligible files under every root, as (unit id, path)
    fn discover(&self) -> Vec<(String, PathBuf)> {
        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();

        for root in &self.config.roots {
            if !root.exists() {
                warn!("Source root does not exist: {:?}", root);
                continue;
            }

            let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
            if !self.config.recursive {
                walker = walker.max_depth(1);
            }

            let entries = walker.into_iter().filter_entry(|e| {
                e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| n.starts_with('.'))
            });

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Walk error under {:?}: {}", root, e);
                        continue;
                    }
                };
                let path = entry.path();
                if !entry.file_type().is_file() || !self.config.is_eligible(path) {
                    continue;
                }
                let Some(unit_id) = unit_id_for(root, path) else {
                    continue;
                };
                if let Some(existing) = found.get(&unit_id) {
                    warn!(
                        "Unit id {} already provided by {:?}; ignoring {:?}",
                        unit_id, existing, path
                    );
                    continue;
                }
                found.insert(unit_id, path.to_path_buf());
            }
        }

        found.into_iter().collect()
    }

    /// Units whose observed checksum differs from the committed one
    pub fn dirty_units(&self) -> Vec<String> {
        self.units
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record a failed transaction attempt for these units
    pub fn mark_attempted(&self, unit_ids: &[String]) {
        let mut units = self.units.write();
        for unit_id in unit_ids {
            if let Some(entry) = units.get_mut(unit_id) {
                entry.attempted_checksum = entry.observed_checksum.clone();
            }
        }
    }

    /// Record a load or health failure against a unit
    pub fn record_error(&self, unit_id: &str, message: impl Into<String>) {
        if let Some(entry) = self.units.write().get_mut(unit_id) {
            entry.record_error(message.into());
        }
    }

    /// Record the content a committed transaction activated
    ///
    /// The version only moves when the committed checksum differs from the
    /// previous one.
    pub fn commit(&self, unit_id: &str, checksum: &str, loaded_at: DateTime<Utc>) {
        let mut units = self.units.write();
        let Some(entry) = units.get_mut(unit_id) else {
            warn!("Commit for unknown unit {}", unit_id);
            return;
        };

        if entry.unit.content_checksum.as_deref() != Some(checksum) {
            entry.unit.version += 1;
            entry.unit.content_checksum = Some(checksum.to_string());
        }
        entry.unit.loaded_at = Some(loaded_at);
        entry.attempted_checksum = None;
    }

    pub fn set_instance_count(&self, unit_id: &str, count: usize) {
        if let Some(entry) = self.units.write().get_mut(unit_id) {
            entry.unit.instance_count = count;
        }
    }

    pub fn unit(&self, unit_id: &str) -> Option<TrackedUnit> {
        self.units.read().get(unit_id).map(|entry| entry.unit.clone())
    }

    pub fn units(&self) -> Vec<TrackedUnit> {
        self.units.read().values().map(|entry| entry.unit.clone()).collect()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.units.read().contains_key(unit_id)
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }
}

/// `root/agents/solomon.toml` -> `agents/solomon`
pub fn unit_id_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let stem = relative.with_extension("");
    let parts: Vec<String> = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
