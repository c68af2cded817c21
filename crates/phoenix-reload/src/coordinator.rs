//! Health-gated blue/green reload coordinator
//!
//! One transaction runs at a time. Batches submitted while a transaction is
//! in flight are merged into a pending set and drained by whoever holds the
//! transaction lock. A transaction loads the batch into the inactive slot,
//! probes every loaded unit, and only then flips the active pointer. Any
//! failure before the flip leaves the active slot untouched; a failure while
//! switching flips the pointer back.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use phoenix_kernel::{ReloadEvent, SlotName};
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, error, info, warn};

use crate::error::{ReloadError, ReloadResult};
use crate::loader::{LoadedUnit, UnitLoader};
use crate::metrics::{ReloadMetrics, ReloadStatus};
use crate::slot::SlotSet;
use crate::tracker::{ChangeTracker, TrackedUnit};
use crate::transaction::{ReloadTransaction, TransactionRecord, TransactionStatus};
use crate::watcher::UnitWatcher;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Poll cadence
    pub poll_interval: Duration,
    /// Bound on a single unit load
    pub load_timeout: Duration,
    /// Overall cap on the health-check phase
    pub health_timeout: Duration,
    /// Bound on a single probe
    pub probe_timeout: Duration,
    /// Units with these id prefixes load first
    pub shared_prefixes: Vec<String>,
    /// Start a filesystem watcher alongside the poller
    pub watch_events: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            load_timeout: Duration::from_millis(10_000),
            health_timeout: Duration::from_millis(5_000),
            probe_timeout: Duration::from_millis(2_000),
            shared_prefixes: vec!["shared/".into(), "core/".into(), "common/".into()],
            watch_events: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_shared_prefix(mut self, prefix: &str) -> Self {
        self.shared_prefixes.push(prefix.to_string());
        self
    }

    pub fn with_watch_events(mut self, enabled: bool) -> Self {
        self.watch_events = enabled;
        self
    }
}

/// Payload handed to commit callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    pub transaction_id: String,
    /// Committed units in load order
    pub unit_ids: Vec<String>,
    pub active_slot: SlotName,
    pub committed_at: DateTime<Utc>,
}

/// Invoked during SWITCHING; an `Err` or a panic reverts the switch
pub type CommitCallback = Arc<dyn Fn(&CommitEvent) -> Result<(), String> + Send + Sync>;

/// Invoked once a transaction has COMMITTED; never sees a reverted switch
pub type CommitListener = Arc<dyn Fn(&CommitEvent) + Send + Sync>;

/// Order units for loading: shared prefixes first, then by id
///
/// This is a prefix heuristic, not dependency resolution.
pub fn priority_order(unit_ids: impl IntoIterator<Item = String>, shared_prefixes: &[String]) -> Vec<String> {
    let unique: BTreeSet<String> = unit_ids.into_iter().collect();
    let mut ordered: Vec<String> = unique.into_iter().collect();
    ordered.sort_by_key(|id| !shared_prefixes.iter().any(|p| id.starts_with(p.as_str())));
    ordered
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

/// Coordinates reload transactions over a [`SlotSet`]
pub struct ReloadCoordinator {
    config: CoordinatorConfig,
    tracker: Arc<ChangeTracker>,
    loader: Arc<dyn UnitLoader>,
    slots: SlotSet,
    tx_lock: tokio::sync::Mutex<()>,
    pending: Mutex<BTreeSet<String>>,
    in_flight: AtomicBool,
    metrics: RwLock<ReloadMetrics>,
    last_transaction: RwLock<Option<TransactionRecord>>,
    callbacks: RwLock<Vec<CommitCallback>>,
    listeners: RwLock<Vec<CommitListener>>,
    event_tx: broadcast::Sender<ReloadEvent>,
}

impl ReloadCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        tracker: Arc<ChangeTracker>,
        loader: Arc<dyn UnitLoader>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            config,
            tracker,
            loader,
            slots: SlotSet::new(),
            tx_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(BTreeSet::new()),
            in_flight: AtomicBool::new(false),
            metrics: RwLock::new(ReloadMetrics::default()),
            last_transaction: RwLock::new(None),
            callbacks: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn tracker(&self) -> Arc<ChangeTracker> {
        self.tracker.clone()
    }

    pub fn slots(&self) -> &SlotSet {
        &self.slots
    }

    /// Subscribe to reload events
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event to subscribers
    pub fn emit(&self, event: ReloadEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Register a callback fired with the committed unit ids
    pub fn register_commit_callback<F>(&self, callback: F)
    where
        F: Fn(&CommitEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Register a listener notified after every committed transaction
    ///
    /// Listeners run once all commit callbacks have succeeded, so a switch
    /// that is reverted never reaches them.
    pub fn register_commit_listener<F>(&self, listener: F)
    where
        F: Fn(&CommitEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Active slot's copy of a unit, without locking
    pub fn active_unit(&self, unit_id: &str) -> Option<Arc<LoadedUnit>> {
        self.slots.get_active(unit_id)
    }

    pub fn unit_info(&self, unit_id: &str) -> Option<TrackedUnit> {
        self.tracker.unit(unit_id)
    }

    pub fn is_transaction_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_transaction(&self) -> Option<TransactionRecord> {
        self.last_transaction.read().clone()
    }

    pub fn metrics(&self) -> ReloadMetrics {
        self.metrics.read().clone()
    }

    /// Operator reset of the reload counters
    pub fn reset_metrics(&self) {
        info!("Resetting reload metrics");
        self.metrics.write().reset();
    }

    pub fn status(&self) -> ReloadStatus {
        ReloadStatus::new(
            self.slots.active_name(),
            &self.metrics.read(),
            self.tracker.len(),
            self.is_transaction_in_flight(),
            self.last_transaction(),
        )
    }

    /// Initial scan and a transaction loading every tracked unit
    pub async fn bootstrap(&self) -> Option<TransactionRecord> {
        let tracker = self.tracker.clone();
        let batch = match tokio::task::spawn_blocking(move || {
            tracker.scan();
            tracker.dirty_units()
        })
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!("Bootstrap scan failed: {}", e);
                return None;
            }
        };

        if batch.is_empty() {
            info!("Bootstrap found no units to load");
            return None;
        }

        let guard = self.tx_lock.lock().await;
        let (record, _) = self.run_transaction(batch).await;
        drop(guard);
        self.drain_pending().await;
        Some(record)
    }

    /// Queue a batch; runs it now unless a transaction is already in flight
    ///
    /// Returns the records of the transactions this call executed. An empty
    /// result means the batch was merged into the pending set and will be
    /// picked up by the in-flight caller.
    pub async fn submit(&self, unit_ids: Vec<String>) -> Vec<TransactionRecord> {
        if unit_ids.is_empty() {
            return Vec::new();
        }
        self.pending.lock().extend(unit_ids);
        self.drain_pending().await
    }

    async fn drain_pending(&self) -> Vec<TransactionRecord> {
        let mut records = Vec::new();

        loop {
            let Ok(guard) = self.tx_lock.try_lock() else {
                debug!("Transaction in flight; batch queued");
                break;
            };

            loop {
                let batch: Vec<String> = std::mem::take(&mut *self.pending.lock()).into_iter().collect();
                if batch.is_empty() {
                    break;
                }
                let (record, _) = self.run_transaction(batch).await;
                records.push(record);
            }
            drop(guard);

            // a batch may have landed between the last drain and the unlock
            if self.pending.lock().is_empty() {
                break;
            }
        }

        records
    }

    /// Reload one unit now, bypassing retry suppression
    ///
    /// Unknown units are rejected without opening a transaction. Waits for
    /// any in-flight transaction to finish.
    pub async fn force_reload(&self, unit_id: &str) -> ReloadResult<TransactionRecord> {
        if !self.tracker.contains(unit_id) {
            return Err(ReloadError::UnitNotFound(unit_id.to_string()));
        }

        let tracker = self.tracker.clone();
        let id = unit_id.to_string();
        tokio::task::spawn_blocking(move || tracker.refresh_unit(&id))
            .await
            .map_err(|e| ReloadError::Internal(e.to_string()))??;

        info!("Forced reload of unit {}", unit_id);
        let guard = self.tx_lock.lock().await;
        let (record, error) = self.run_transaction(vec![unit_id.to_string()]).await;
        drop(guard);
        self.drain_pending().await;

        match error {
            None => Ok(record),
            Some(e) => Err(e),
        }
    }

    /// Run one transaction; the caller holds `tx_lock`
    async fn run_transaction(&self, batch: Vec<String>) -> (TransactionRecord, Option<ReloadError>) {
        let unit_ids = priority_order(batch, &self.config.shared_prefixes);
        let target = self.slots.active_name().other();
        let mut tx = ReloadTransaction::new(unit_ids, target);

        self.in_flight.store(true, Ordering::Release);
        info!(
            "Transaction {} started: {:?} -> {}",
            tx.id, tx.unit_ids, target
        );
        self.emit(ReloadEvent::TransactionStarted {
            transaction_id: tx.id.clone(),
            unit_ids: tx.unit_ids.clone(),
            target_slot: target,
        });

        let error = match self.load_and_check(&mut tx).await {
            Ok(loaded) => self.switch(&mut tx, &loaded),
            Err(e) => {
                self.roll_back(&mut tx, &e);
                Some(e)
            }
        };

        let record = tx.record(error.as_ref());
        *self.last_transaction.write() = Some(record.clone());
        self.in_flight.store(false, Ordering::Release);
        (record, error)
    }

    /// LOADING and HEALTH_CHECKING
    async fn load_and_check(&self, tx: &mut ReloadTransaction) -> ReloadResult<Vec<Arc<LoadedUnit>>> {
        let slot = self.slots.slot(tx.target_slot);
        slot.reset_from(self.slots.active());

        tx.advance(TransactionStatus::Loading);
        let mut loaded = Vec::with_capacity(tx.unit_ids.len());
        for unit_id in &tx.unit_ids {
            let unit = match self.load_unit(unit_id).await {
                Ok(unit) => Arc::new(unit),
                Err(e) => {
                    self.tracker.record_error(unit_id, e.to_string());
                    return Err(e);
                }
            };
            debug!("Transaction {} loaded {} ({})", tx.id, unit_id, unit.checksum);
            self.emit(ReloadEvent::UnitLoaded {
                transaction_id: tx.id.clone(),
                unit_id: unit_id.clone(),
                checksum: unit.checksum.clone(),
            });
            slot.insert(unit.clone());
            loaded.push(unit);
        }

        tx.advance(TransactionStatus::HealthChecking);
        self.health_check(&loaded).await?;
        Ok(loaded)
    }

    async fn load_unit(&self, unit_id: &str) -> ReloadResult<LoadedUnit> {
        let unit = self
            .tracker
            .unit(unit_id)
            .ok_or_else(|| ReloadError::load(unit_id, "unit is not tracked"))?;

        let load = AssertUnwindSafe(self.loader.load(&unit)).catch_unwind();
        match timeout(self.config.load_timeout, load).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(ReloadError::load(
                unit_id,
                format!("loader panicked: {}", panic_message(payload.as_ref())),
            )),
            Err(_) => Err(ReloadError::load(
                unit_id,
                format!("load timed out after {}ms", self.config.load_timeout.as_millis()),
            )),
        }
    }

    async fn health_check(&self, loaded: &[Arc<LoadedUnit>]) -> ReloadResult<()> {
        let probe_timeout = self.config.probe_timeout;
        let probes = loaded.iter().map(|unit| async move {
            let probe = AssertUnwindSafe(unit.health_check()).catch_unwind();
            match timeout(probe_timeout, probe).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(ReloadError::health(
                    &unit.unit_id,
                    format!("probe panicked: {}", panic_message(payload.as_ref())),
                )),
                Err(_) => Err(ReloadError::health(
                    &unit.unit_id,
                    format!("probe timed out after {}ms", probe_timeout.as_millis()),
                )),
            }
        });

        let results = timeout(self.config.health_timeout, join_all(probes))
            .await
            .map_err(|_| ReloadError::HealthCheckTimeout {
                timeout_ms: self.config.health_timeout.as_millis() as u64,
            })?;

        // first failure in load order
        for (unit, result) in loaded.iter().zip(results) {
            if let Err(e) = result {
                self.tracker.record_error(&unit.unit_id, e.to_string());
                return Err(e);
            }
        }
        Ok(())
    }

    /// SWITCHING, then COMMITTED or FAILED
    fn switch(&self, tx: &mut ReloadTransaction, loaded: &[Arc<LoadedUnit>]) -> Option<ReloadError> {
        tx.advance(TransactionStatus::Switching);
        let previous = self.slots.set_active(tx.target_slot);
        debug!("Transaction {} switched {} -> {}", tx.id, previous, tx.target_slot);

        let event = CommitEvent {
            transaction_id: tx.id.clone(),
            unit_ids: tx.unit_ids.clone(),
            active_slot: tx.target_slot,
            committed_at: Utc::now(),
        };
        let callbacks: Vec<CommitCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            let outcome = match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(result) => result,
                Err(payload) => Err(panic_message(payload.as_ref())),
            };

            if let Err(message) = outcome {
                self.slots.set_active(previous);
                tx.advance(TransactionStatus::Failed);
                self.tracker.mark_attempted(&tx.unit_ids);
                self.metrics.write().record_failure();

                let err = ReloadError::CallbackFailed(message);
                error!(
                    "Transaction {} FAILED during switch, restored {}: {}",
                    tx.id, previous, err
                );
                self.emit(ReloadEvent::TransactionFailed {
                    transaction_id: tx.id.clone(),
                    error: err.to_string(),
                });
                return Some(err);
            }
        }

        for unit in loaded {
            self.tracker.commit(&unit.unit_id, &unit.checksum, unit.loaded_at);
        }
        tx.advance(TransactionStatus::Committed);
        let duration = tx.elapsed();
        self.metrics.write().record_success(duration);

        info!(
            "Transaction {} COMMITTED: {} unit(s) active in {} ({:?})",
            tx.id,
            loaded.len(),
            tx.target_slot,
            duration
        );
        self.emit(ReloadEvent::TransactionCommitted {
            transaction_id: tx.id.clone(),
            unit_ids: tx.unit_ids.clone(),
            active_slot: tx.target_slot,
            duration,
        });

        let listeners: Vec<CommitListener> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                error!(
                    "Commit listener panicked for transaction {}: {}",
                    tx.id,
                    panic_message(payload.as_ref())
                );
            }
        }
        None
    }

    fn roll_back(&self, tx: &mut ReloadTransaction, err: &ReloadError) {
        self.slots.slot(tx.target_slot).clear();
        tx.advance(TransactionStatus::RolledBack);
        self.tracker.mark_attempted(&tx.unit_ids);
        self.metrics.write().record_failure();

        warn!(
            "Transaction {} ROLLED_BACK, {} still active: {}",
            tx.id,
            self.slots.active_name(),
            err
        );
        self.emit(ReloadEvent::TransactionRolledBack {
            transaction_id: tx.id.clone(),
            unit_id: err.unit_id().map(str::to_string),
            error: err.to_string(),
        });
    }

    /// Start the periodic poller (and the event watcher when enabled)
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_poller(self: &Arc<Self>) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (nudge_tx, mut nudge_rx) = mpsc::channel::<()>(1);

        let watcher = if self.config.watch_events {
            let mut watcher = UnitWatcher::new(self.tracker.config().clone());
            match watcher.start(nudge_tx.clone()) {
                Ok(()) => Some(watcher),
                Err(e) => {
                    warn!("Unit watcher unavailable, polling only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let coordinator = Arc::clone(self);
        let interval = self.config.poll_interval;
        let handle = tokio::spawn(async move {
            info!("Poller started ({:?} interval)", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {}
                    Some(()) = nudge_rx.recv() => debug!("Poll nudged by watcher"),
                }

                let tracker = coordinator.tracker();
                let batch = match tokio::task::spawn_blocking(move || tracker.poll_changes()).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!("Poll cycle failed: {}", e);
                        continue;
                    }
                };
                if !batch.is_empty() {
                    coordinator.submit(batch).await;
                }
            }
            info!("Poller stopped");
        });

        PollerHandle {
            shutdown_tx,
            _nudge_tx: nudge_tx,
            handle,
            watcher,
        }
    }
}

/// Handle to a running poller
pub struct PollerHandle {
    shutdown_tx: mpsc::Sender<()>,
    _nudge_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    watcher: Option<UnitWatcher>,
}

impl PollerHandle {
    /// Stop between cycles and wait for the poller to exit
    pub async fn stop(mut self) {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.stop().await;
        }
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}
