//! Phoenix Testing Framework
//!
//! Mock agents, scripted unit loaders and on-disk fixtures for exercising
//! hot reloads without a real deployment.

pub mod agent;
pub mod fixture;
pub mod loader;

pub use agent::{Delivery, DeliveryLog, MockAgent, MockAgentFactory, MockBehavior, live_state};
pub use fixture::UnitFixture;
pub use gate::Gate;
pub use loader::{FailingProbe, ScriptedLoader, SlowProbe};

use phoenix_reload::{AgentStateBridge, BridgeReport, ReloadCoordinator, TransactionRecord};
use std::future::Future;
use std::time::Duration;

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run one poll cycle now and submit whatever it found
pub async fn poll_once(coordinator: &ReloadCoordinator) -> Vec<TransactionRecord> {
    let batch = coordinator.tracker().poll_changes();
    coordinator.submit(batch).await
}

/// Wait for the bridge to finish the commit of `transaction_id`
pub async fn bridge_report(
    bridge: &AgentStateBridge,
    transaction_id: &str,
    timeout: Duration,
) -> Option<BridgeReport> {
    let found = eventually(timeout, || async {
        bridge
            .reports()
            .iter()
            .any(|r| r.transaction_id == transaction_id)
    })
    .await;
    if !found {
        return None;
    }
    bridge
        .reports()
        .into_iter()
        .find(|r| r.transaction_id == transaction_id)
}

#[macro_export]
macro_rules! assert_delivered {
    ($log:expr, $agent:expr, [$($text:expr),* $(,)?]) => {
        let expected: Vec<String> = vec![$($text.to_string()),*];
        let actual = $log.texts($agent);
        assert_eq!(
            actual, expected,
            "Expected agent '{}' to receive {:?} in order, but it received {:?}",
            $agent, expected, actual
        );
    };
}
