//! Reload metrics and the operator status view

use chrono::{DateTime, Utc};
use phoenix_kernel::SlotName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transaction::TransactionRecord;

/// Process-wide reload counters
///
/// Monotonic except for an explicit [`ReloadMetrics::reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadMetrics {
    pub total_reloads: u64,
    pub successful_reloads: u64,
    pub failed_reloads: u64,
    /// Mean duration of committed transactions
    pub rolling_average_duration_ms: f64,
    /// Time of the last committed transaction
    pub last_reload_timestamp: Option<DateTime<Utc>>,
}

impl ReloadMetrics {
    pub fn record_success(&mut self, duration: Duration) {
        self.total_reloads += 1;
        self.successful_reloads += 1;
        let ms = duration.as_secs_f64() * 1000.0;
        let n = self.successful_reloads as f64;
        self.rolling_average_duration_ms += (ms - self.rolling_average_duration_ms) / n;
        self.last_reload_timestamp = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.total_reloads += 1;
        self.failed_reloads += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot returned by `status()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadStatus {
    pub active_slot: SlotName,
    pub total_reloads: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_duration_ms: f64,
    pub last_reload_timestamp: Option<DateTime<Utc>>,
    pub tracked_unit_count: usize,
    pub transaction_in_flight: bool,
    pub last_transaction: Option<TransactionRecord>,
}

impl ReloadStatus {
    pub(crate) fn new(
        active_slot: SlotName,
        metrics: &ReloadMetrics,
        tracked_unit_count: usize,
        transaction_in_flight: bool,
        last_transaction: Option<TransactionRecord>,
    ) -> Self {
        Self {
            active_slot,
            total_reloads: metrics.total_reloads,
            success_count: metrics.successful_reloads,
            failure_count: metrics.failed_reloads,
            avg_duration_ms: metrics.rolling_average_duration_ms,
            last_reload_timestamp: metrics.last_reload_timestamp,
            tracked_unit_count,
            transaction_in_flight,
            last_transaction,
        }
    }
}
