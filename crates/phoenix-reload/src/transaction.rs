//! Reload transactions

use chrono::{DateTime, Utc};
use phoenix_kernel::SlotName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::error::ReloadError;

/// Transaction state machine
///
/// `PENDING -> LOADING -> HEALTH_CHECKING -> SWITCHING -> {COMMITTED | ROLLED_BACK | FAILED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Loading,
    HealthChecking,
    Switching,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }

    /// Valid forward transitions
    pub fn can_advance_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Loading)
                | (Loading, HealthChecking)
                | (Loading, RolledBack)
                | (HealthChecking, Switching)
                | (HealthChecking, RolledBack)
                | (Switching, Committed)
                | (Switching, Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Loading => "LOADING",
            Self::HealthChecking => "HEALTH_CHECKING",
            Self::Switching => "SWITCHING",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One attempt to reload a batch of units
#[derive(Debug)]
pub struct ReloadTransaction {
    pub id: String,
    /// Affected units in load order
    pub unit_ids: Vec<String>,
    pub target_slot: SlotName,
    pub started_at: DateTime<Utc>,
    started: Instant,
    status: TransactionStatus,
}

impl ReloadTransaction {
    pub fn new(unit_ids: Vec<String>, target_slot: SlotName) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            unit_ids,
            target_slot,
            started_at: Utc::now(),
            started: Instant::now(),
            status: TransactionStatus::Pending,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to the next phase; invalid transitions are ignored and logged
    pub(crate) fn advance(&mut self, next: TransactionStatus) -> bool {
        if !self.status.can_advance_to(next) {
            debug!(
                "Transaction {} ignoring transition {} -> {}",
                self.id, self.status, next
            );
            return false;
        }
        debug!("Transaction {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        true
    }

    /// Terminal record for the status API
    pub(crate) fn record(&self, error: Option<&ReloadError>) -> TransactionRecord {
        TransactionRecord {
            transaction_id: self.id.clone(),
            unit_ids: self.unit_ids.clone(),
            target_slot: self.target_slot,
            status: self.status,
            failed_unit: error.and_then(|e| e.unit_id()).map(str::to_string),
            error: error.map(|e| e.to_string()),
            started_at: self.started_at,
            duration_ms: self.elapsed().as_millis() as u64,
        }
    }
}

/// Retained outcome of a finished transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub unit_ids: Vec<String>,
    pub target_slot: SlotName,
    pub status: TransactionStatus,
    /// Offending unit, when the failure is attributable to one
    pub failed_unit: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TransactionRecord {
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }
}
