use phoenix_reload::{
    ChangeTracker, CoordinatorConfig, ReloadCoordinator, ReloadError, ReloadEvent, TrackerConfig,
    TransactionStatus,
};
use phoenix_reload::probe_fn;
use phoenix_testing::{FailingProbe, ScriptedLoader, SlowProbe, UnitFixture, eventually, poll_once};
use std::sync::Arc;
use std::time::Duration;

fn coordinator(fixture: &UnitFixture, loader: Arc<ScriptedLoader>) -> Arc<ReloadCoordinator> {
    coordinator_with(fixture, loader, CoordinatorConfig::new())
}

fn coordinator_with(
    fixture: &UnitFixture,
    loader: Arc<ScriptedLoader>,
    config: CoordinatorConfig,
) -> Arc<ReloadCoordinator> {
    let tracker = Arc::new(ChangeTracker::new(TrackerConfig::new().with_root(fixture.root())));
    Arc::new(ReloadCoordinator::new(
        config.with_watch_events(false),
        tracker,
        loader,
    ))
}

#[tokio::test]
async fn test_batch_with_failing_load_rolls_back() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();
    fixture.write("b.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    assert!(coordinator.bootstrap().await.unwrap().is_committed());
    let active_before = coordinator.slots().active_name();
    let checksums_before = coordinator.slots().active().checksums();
    let metrics_before = coordinator.metrics();

    fixture.modify("a.toml", "v = 2\n").unwrap();
    fixture.modify("b.toml", "v = 2\n").unwrap();
    loader.fail("b", "unexpected token");

    let records = poll_once(&coordinator).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, TransactionStatus::RolledBack);
    assert_eq!(record.failed_unit.as_deref(), Some("b"));
    assert!(record.error.as_deref().unwrap().contains("unexpected token"));

    assert_eq!(coordinator.slots().active_name(), active_before);
    assert_eq!(coordinator.slots().active().checksums(), checksums_before);
    assert_eq!(coordinator.unit_info("a").unwrap().version, 1);
    assert_eq!(coordinator.unit_info("b").unwrap().error_count, 1);

    let metrics = coordinator.metrics();
    assert_eq!(metrics.failed_reloads, metrics_before.failed_reloads + 1);
    assert_eq!(metrics.successful_reloads, metrics_before.successful_reloads);
    assert_eq!(coordinator.last_transaction().unwrap(), *record);
}

#[tokio::test]
async fn test_failed_batch_retries_once_fixed() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();
    fixture.write("b.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    coordinator.bootstrap().await;

    fixture.modify("a.toml", "v = 2\n").unwrap();
    fixture.modify("b.toml", "v = 2\n").unwrap();
    loader.fail("b", "unexpected token");
    poll_once(&coordinator).await;

    // same broken content: nothing to retry
    assert!(poll_once(&coordinator).await.is_empty());

    loader.heal("b");
    fixture.modify("b.toml", "v = 3\n").unwrap();
    let records = poll_once(&coordinator).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_committed());
    assert_eq!(records[0].unit_ids, vec!["a", "b"]);
    assert_eq!(coordinator.unit_info("a").unwrap().version, 2);
    assert_eq!(coordinator.unit_info("b").unwrap().version, 2);
}

#[tokio::test]
async fn test_readers_see_old_code_while_loading() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("agents/solomon.json", r#"{"goal": "plan"}"#).unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    coordinator.bootstrap().await;
    let old = coordinator.active_unit("agents/solomon").unwrap();

    fixture.modify("agents/solomon.json", r#"{"goal": "act"}"#).unwrap();
    let gate = loader.gate("agents/solomon");
    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { poll_once(&coordinator).await })
    };

    gate.entered().await;
    assert!(coordinator.is_transaction_in_flight());
    let during = coordinator.active_unit("agents/solomon").unwrap();
    assert_eq!(during.checksum, old.checksum);
    assert_eq!(during.definition["goal"], "plan");

    gate.release();
    let records = running.await.unwrap();
    assert!(records[0].is_committed());
    let after = coordinator.active_unit("agents/solomon").unwrap();
    assert_eq!(after.definition["goal"], "act");
    assert!(!coordinator.is_transaction_in_flight());
}

#[tokio::test]
async fn test_failing_probe_keeps_active_checksums() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("shared/tools.toml", "v = 1\n").unwrap();
    fixture.write("agents/solomon.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    coordinator.bootstrap().await;
    let before = coordinator.slots().active().checksums();

    loader.register_probe("agents/solomon", FailingProbe::new("missing goal list"));
    fixture.modify("shared/tools.toml", "v = 2\n").unwrap();
    fixture.modify("agents/solomon.toml", "v = 2\n").unwrap();

    let records = poll_once(&coordinator).await;
    assert_eq!(records[0].status, TransactionStatus::RolledBack);
    assert_eq!(records[0].failed_unit.as_deref(), Some("agents/solomon"));
    // shared units load first
    assert_eq!(records[0].unit_ids, vec!["shared/tools", "agents/solomon"]);
    assert_eq!(coordinator.slots().active().checksums(), before);
    // the inactive slot holds nothing half-loaded
    assert!(coordinator.slots().inactive().is_empty());
}

#[tokio::test]
async fn test_health_phase_is_capped() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator_with(
        &fixture,
        loader.clone(),
        CoordinatorConfig::new()
            .with_health_timeout(Duration::from_millis(50))
            .with_probe_timeout(Duration::from_secs(5)),
    );
    coordinator.bootstrap().await;

    loader.register_probe("a", SlowProbe::new(Duration::from_secs(2)));
    fixture.modify("a.toml", "v = 2\n").unwrap();

    let records = poll_once(&coordinator).await;
    assert_eq!(records[0].status, TransactionStatus::RolledBack);
    assert!(records[0].failed_unit.is_none());
    assert!(records[0].error.as_deref().unwrap().contains("50ms"));
}

#[tokio::test]
async fn test_panicking_health_check_ends_in_rollback() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    coordinator.bootstrap().await;
    let before = coordinator.slots().active().checksums();

    loader.register_probe("a", probe_fn(|_| panic!("probe bug")));
    fixture.modify("a.toml", "v = 2\n").unwrap();

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { poll_once(&coordinator).await })
    };
    let records = running.await.unwrap();

    assert_eq!(records[0].status, TransactionStatus::RolledBack);
    assert!(records[0].error.as_deref().unwrap().contains("probe bug"));
    assert!(!coordinator.is_transaction_in_flight());
    assert_eq!(
        coordinator.last_transaction().unwrap().status,
        TransactionStatus::RolledBack
    );
    assert_eq!(coordinator.metrics().failed_reloads, 1);
    assert_eq!(coordinator.slots().active().checksums(), before);
    assert!(coordinator.slots().inactive().is_empty());
}

#[tokio::test]
async fn test_poller_outlives_a_panicking_health_check() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator_with(
        &fixture,
        loader.clone(),
        CoordinatorConfig::new().with_poll_interval(Duration::from_millis(20)),
    );
    coordinator.bootstrap().await;
    let poller = coordinator.spawn_poller();

    loader.register_probe("a", probe_fn(|_| panic!("probe bug")));
    fixture.modify("a.toml", "v = 2\n").unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            coordinator.metrics().failed_reloads == 1
        })
        .await
    );

    loader.register_probe("a", probe_fn(|_| Ok(())));
    fixture.modify("a.toml", "v = 3\n").unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            coordinator
                .active_unit("a")
                .is_some_and(|unit| unit.definition["v"] == 3)
        })
        .await
    );

    poller.stop().await;
}

#[tokio::test]
async fn test_force_reload() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    coordinator.bootstrap().await;

    let err = coordinator.force_reload("ghost").await.unwrap_err();
    assert!(matches!(err, ReloadError::UnitNotFound(_)));
    assert!(err.is_lookup());

    // unchanged content still reloads, but the version stays
    let record = coordinator.force_reload("a").await.unwrap();
    assert!(record.is_committed());
    assert_eq!(loader.load_count("a"), 2);
    assert_eq!(coordinator.unit_info("a").unwrap().version, 1);

    loader.fail("a", "broken");
    let err = coordinator.force_reload("a").await.unwrap_err();
    assert!(matches!(err, ReloadError::Load { .. }));
    assert_eq!(coordinator.status().failure_count, 1);
}

#[tokio::test]
async fn test_event_stream_reports_phases() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("a.toml", "v = 1\n").unwrap();

    let loader = Arc::new(ScriptedLoader::new());
    let coordinator = coordinator(&fixture, loader.clone());
    let mut events = coordinator.subscribe();
    coordinator.bootstrap().await;

    assert!(matches!(events.recv().await.unwrap(), ReloadEvent::TransactionStarted { .. }));
    assert!(matches!(events.recv().await.unwrap(), ReloadEvent::UnitLoaded { .. }));
    assert!(matches!(events.recv().await.unwrap(), ReloadEvent::TransactionCommitted { .. }));

    let status = coordinator.status();
    assert_eq!(status.success_count, 1);
    assert_eq!(status.tracked_unit_count, 1);
    assert!(!status.transaction_in_flight);
}
