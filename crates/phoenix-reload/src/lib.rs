//! Zero-downtime hot reload for Phoenix agents
//!
//! - Change tracking with checksum-based drift detection
//! - Blue/green deployment slots with a lock-free active pointer
//! - Health-gated reload transactions with automatic rollback
//! - State-preserving agent swaps with buffered traffic

mod bridge;
mod coordinator;
mod error;
mod loader;
mod manifest;
mod metrics;
mod slot;
mod snapshot;
mod tracker;
mod transaction;
mod watcher;

pub use bridge::{
    AgentOutcome, AgentReport, AgentStateBridge, BridgeConfig, BridgeHandle, BridgeReport,
    OfflineAgent,
};
pub use coordinator::{
    CommitCallback, CommitEvent, CommitListener, CoordinatorConfig, PollerHandle, ReloadCoordinator,
    priority_order,
};
pub use error::{ReloadError, ReloadResult};
pub use loader::{FileUnitLoader, HealthProbe, LoadedUnit, UnitLoader, probe_fn};
pub use manifest::{AgentConstructor, AgentManifest};
pub use metrics::{ReloadMetrics, ReloadStatus};
pub use slot::{DeploymentSlot, SlotSet};
pub use snapshot::{AbandonedSnapshot, AgentSnapshot, SnapshotStore};
pub use tracker::{ChangeTracker, ScanReport, TrackedUnit, TrackerConfig, checksum, unit_id_for};
pub use transaction::{ReloadTransaction, TransactionRecord, TransactionStatus};
pub use watcher::UnitWatcher;

// Re-export kernel reload definitions
pub use phoenix_kernel::{ReloadEvent, SlotName};
