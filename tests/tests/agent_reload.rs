use phoenix_kernel::{AgentMessage, AgentState, MessageBus, StateMap};
use phoenix_reload::{AgentOutcome, BridgeHandle, BridgeReport, TransactionStatus};
use phoenix_runtime::RuntimeContext;
use phoenix_testing::{
    DeliveryLog, Gate, MockAgentFactory, MockBehavior, UnitFixture, assert_delivered,
    bridge_report, eventually, live_state, poll_once,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    fixture: UnitFixture,
    ctx: RuntimeContext,
    factory: MockAgentFactory,
    log: DeliveryLog,
    bridge: Option<BridgeHandle>,
}

impl Harness {
    /// One agent, "solomon", backed by `agents/solomon.toml`
    async fn new() -> Self {
        let fixture = UnitFixture::new().unwrap();
        fixture.write("agents/solomon.toml", "goal = \"plan\"\n").unwrap();

        let ctx = RuntimeContext::new(fixture.config());
        let log = DeliveryLog::new();
        let factory = MockAgentFactory::new("solomon", log.clone());
        ctx.manifest()
            .register("agents/solomon", "solomon", factory.constructor());

        assert!(ctx.coordinator().bootstrap().await.unwrap().is_committed());
        let bridge = Some(ctx.bridge().attach());

        Self {
            fixture,
            ctx,
            factory,
            log,
            bridge,
        }
    }

    async fn send(&self, payload: serde_json::Value) {
        self.ctx
            .bus()
            .send(AgentMessage::new("user", "solomon", payload))
            .await
            .unwrap();
    }

    async fn send_text(&self, text: &str) {
        self.ctx
            .bus()
            .send(AgentMessage::text("user", "solomon", text))
            .await
            .unwrap();
    }

    /// Change the unit and commit it; returns the transaction id
    async fn change_unit(&self, content: &str) -> String {
        self.fixture.modify("agents/solomon.toml", content).unwrap();
        let records = poll_once(&self.ctx.coordinator()).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_committed(), "{:?}", records[0]);
        records[0].transaction_id.clone()
    }

    async fn report(&self, transaction_id: &str) -> BridgeReport {
        bridge_report(&self.ctx.bridge(), transaction_id, WAIT)
            .await
            .expect("bridge did not process the commit")
    }

    async fn state(&self) -> StateMap {
        live_state(self.ctx.registry().as_ref(), "solomon").await.unwrap()
    }

    async fn stop(mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.stop().await;
        }
        self.ctx.shutdown().await;
    }
}

#[tokio::test]
async fn test_solomon_keeps_goal_and_pause_window_message() {
    let h = Harness::new().await;
    let gate = Arc::new(Gate::new());
    h.factory.set_stop_gate(gate.clone());
    h.ctx.launch_agent("solomon").await.unwrap();
    h.send(json!({"set": {"goal_index": 2}})).await;

    let tx = h.change_unit("goal = \"act\"\n").await;

    // the old instance is stopping and delivery is paused
    gate.entered().await;
    h.send_text("during-pause").await;
    assert_eq!(h.ctx.bus().buffer_size("solomon").await, 1);
    gate.release();

    let report = h.report(&tx).await;
    let agent = report.agent("solomon").unwrap();
    assert_eq!(agent.outcome, AgentOutcome::Reloaded { state_restored: true });
    assert_eq!(agent.flushed_messages, 1);

    h.send_text("after-resume").await;

    assert_eq!(h.factory.built(), 2);
    assert_eq!(h.state().await.get("goal_index"), Some(&json!(2)));

    let texts: Vec<_> = h
        .log
        .for_agent("solomon")
        .into_iter()
        .filter(|d| d.text().is_some())
        .collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0].text(), Some("during-pause"));
    assert_eq!(texts[0].generation, 2);
    assert_eq!(texts[1].text(), Some("after-resume"));
    assert_eq!(texts[1].generation, 2);

    h.stop().await;
}

#[tokio::test]
async fn test_pause_window_messages_arrive_in_order() {
    let h = Harness::new().await;
    let gate = Arc::new(Gate::new());
    h.factory.set_stop_gate(gate.clone());
    h.ctx.launch_agent("solomon").await.unwrap();

    let tx = h.change_unit("goal = \"act\"\n").await;
    gate.entered().await;
    for text in ["M1", "M2", "M3"] {
        h.send_text(text).await;
    }
    gate.release();

    let report = h.report(&tx).await;
    assert_eq!(report.agent("solomon").unwrap().flushed_messages, 3);
    assert_delivered!(h.log, "solomon", ["M1", "M2", "M3"]);
    assert!(h.log.for_agent("solomon").iter().all(|d| d.generation == 2));
    assert_eq!(h.ctx.bus().buffer_size("solomon").await, 0);

    h.stop().await;
}

#[tokio::test]
async fn test_counter_survives_reload() {
    let h = Harness::new().await;
    h.ctx.launch_agent("solomon").await.unwrap();
    h.send(json!({"set": {"counter": 5}})).await;

    let tx = h.change_unit("goal = \"act\"\n").await;
    h.report(&tx).await;

    let expected = StateMap::from([("counter".to_string(), json!(5))]);
    assert_eq!(h.state().await, expected);
    let history = h.ctx.bridge().snapshots().history("solomon").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get::<u64>("counter"), Some(5));

    h.stop().await;
}

#[tokio::test]
async fn test_rejected_snapshot_means_cold_start() {
    let h = Harness::new().await;
    h.ctx.launch_agent("solomon").await.unwrap();
    h.send(json!({"set": {"goal_index": 2}})).await;

    h.factory.set_behavior(MockBehavior {
        fail_import: true,
        ..Default::default()
    });
    let tx = h.change_unit("goal = \"act\"\n").await;
    let report = h.report(&tx).await;

    assert_eq!(
        report.agent("solomon").unwrap().outcome,
        AgentOutcome::Reloaded { state_restored: false }
    );
    assert!(h.state().await.is_empty());
    assert_eq!(
        h.ctx.registry().status("solomon").await,
        Some(AgentState::Running)
    );

    let abandoned = h.ctx.bridge().snapshots().abandoned().await;
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].snapshot.get::<u64>("goal_index"), Some(2));

    h.stop().await;
}

#[tokio::test]
async fn test_offline_agent_recovers_on_next_commit() {
    let h = Harness::new().await;
    h.ctx.launch_agent("solomon").await.unwrap();
    h.send(json!({"set": {"counter": 5}})).await;

    h.factory.set_behavior(MockBehavior {
        fail_start: true,
        ..Default::default()
    });
    let tx = h.change_unit("goal = \"act\"\n").await;
    let report = h.report(&tx).await;
    assert!(matches!(
        report.agent("solomon").unwrap().outcome,
        AgentOutcome::Offline { .. }
    ));
    assert!(h.ctx.bridge().is_offline("solomon"));
    let offline = h.ctx.bridge().offline_agents();
    let kept = offline[0].snapshot.as_ref().unwrap();
    assert_eq!(kept.snapshot.get::<u64>("counter"), Some(5));
    assert!(h.ctx.bus().is_paused("solomon").await);

    // traffic waits for the agent to come back
    h.send_text("while-offline").await;
    assert_eq!(h.ctx.bus().buffer_size("solomon").await, 1);

    h.factory.set_behavior(MockBehavior::default());
    let tx = h.change_unit("goal = \"act, fixed\"\n").await;
    let report = h.report(&tx).await;
    let agent = report.agent("solomon").unwrap();
    assert_eq!(agent.outcome, AgentOutcome::Reloaded { state_restored: true });
    assert_eq!(agent.flushed_messages, 1);

    assert!(!h.ctx.bridge().is_offline("solomon"));
    assert_eq!(h.state().await.get("counter"), Some(&json!(5)));
    // the reused snapshot is restored, no longer abandoned
    let bridge = h.ctx.bridge();
    let snapshots = bridge.snapshots();
    assert!(snapshots.abandoned().await.is_empty());
    assert_eq!(snapshots.history("solomon").await.len(), 1);
    assert_delivered!(h.log, "solomon", ["while-offline"]);

    h.stop().await;
}

#[tokio::test]
async fn test_rolled_back_unit_leaves_agent_alone() {
    let h = Harness::new().await;
    h.ctx.launch_agent("solomon").await.unwrap();
    h.ctx
        .file_loader()
        .unwrap()
        .register_probe("agents/solomon", phoenix_testing::FailingProbe::new("no goals"));

    h.fixture
        .modify("agents/solomon.toml", "goal = \"act\"\n")
        .unwrap();
    let records = poll_once(&h.ctx.coordinator()).await;
    assert!(!records[0].is_committed());

    assert!(h.ctx.bridge().reports().is_empty());
    assert_eq!(h.factory.built(), 1);
    assert_eq!(
        h.ctx.registry().status("solomon").await,
        Some(AgentState::Running)
    );

    h.stop().await;
}

#[tokio::test]
async fn test_reverted_switch_leaves_agent_alone() {
    let h = Harness::new().await;
    h.ctx.launch_agent("solomon").await.unwrap();
    h.send(json!({"set": {"goal_index": 2}})).await;
    h.ctx
        .coordinator()
        .register_commit_callback(|_| Err("audit sink down".to_string()));

    h.fixture
        .modify("agents/solomon.toml", "goal = \"act\"\n")
        .unwrap();
    let records = poll_once(&h.ctx.coordinator()).await;
    assert_eq!(records[0].status, TransactionStatus::Failed);

    // give the bridge worker a chance to pick up anything it was sent
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.ctx.bridge().reports().is_empty());
    assert_eq!(h.factory.built(), 1);
    assert!(!h.ctx.bus().is_paused("solomon").await);
    assert_eq!(h.state().await.get("goal_index"), Some(&json!(2)));
    assert_eq!(
        h.ctx.coordinator().active_unit("agents/solomon").unwrap().definition["goal"],
        "plan"
    );

    h.stop().await;
}

#[tokio::test]
async fn test_runtime_poller_drives_reloads() {
    let fixture = UnitFixture::new().unwrap();
    fixture.write("agents/solomon.toml", "goal = \"plan\"\n").unwrap();

    let mut config = fixture.config();
    config.reload.poll_interval_ms = 20;
    let ctx = RuntimeContext::new(config);
    let log = DeliveryLog::new();
    let factory = MockAgentFactory::new("solomon", log.clone());
    ctx.manifest()
        .register("agents/solomon", "solomon", factory.constructor());

    ctx.start().await.unwrap();
    ctx.launch_agent("solomon").await.unwrap();
    ctx.bus()
        .send(AgentMessage::new("user", "solomon", json!({"set": {"goal_index": 2}})))
        .await
        .unwrap();

    fixture.modify("agents/solomon.toml", "goal = \"act\"\n").unwrap();
    let bridge = ctx.bridge();
    assert!(eventually(WAIT, || async { !bridge.reports().is_empty() }).await);

    assert_eq!(factory.built(), 2);
    let state = live_state(ctx.registry().as_ref(), "solomon").await.unwrap();
    assert_eq!(state.get("goal_index"), Some(&json!(2)));
    assert_eq!(ctx.status().success_count, 2);

    ctx.shutdown().await;
}
