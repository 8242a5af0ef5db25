//! End-to-end failover scenarios, driven against the in-memory
//! `MockCoordinator` double rather than a live Consul cluster.

mod support;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use failover_agent::consul::HealthCheck;
use failover_agent::controller::{FailoverController, TickOutcome};
use failover_agent::role::HealthVerdict;
use failover_agent::{AppHandler, ClusterName, NodeName};

use support::mock_coordinator::{MockCoordinator, NodeView};

#[derive(Default)]
struct RecordingHandler {
    master_calls: Mutex<u32>,
    slave_calls: Mutex<Vec<NodeName>>,
}

#[async_trait]
impl AppHandler for RecordingHandler {
    async fn health(&self) -> HealthVerdict {
        HealthVerdict::ok("fine")
    }

    async fn ensure_master(&self) {
        *self.master_calls.lock().unwrap() += 1;
    }

    async fn ensure_slave(&self, master_node: NodeName) {
        self.slave_calls.lock().unwrap().push(master_node);
    }
}

fn check() -> HealthCheck {
    HealthCheck {
        http_url: "http://127.0.0.1:8000/health".to_string(),
        interval: "30s".to_string(),
        timeout: "5s".to_string(),
    }
}

fn node_controller(
    shared: &Arc<MockCoordinator>,
    node: &str,
    handler: Arc<RecordingHandler>,
) -> FailoverController {
    let node = NodeName::new(node);
    let view: Arc<dyn failover_agent::consul::CoordinatorControl> =
        Arc::new(NodeView::new(shared.clone(), node.clone()));
    FailoverController::new(
        view,
        handler,
        ClusterName::new("mysql-prod"),
        node,
        3306,
        check(),
        Duration::from_secs(1),
        PathBuf::from("/nonexistent-disable-flag"),
    )
}

#[tokio::test]
async fn uncontested_node_wins_leadership_then_a_slower_node_defers() {
    let shared = Arc::new(MockCoordinator::new());
    let a_handler = Arc::new(RecordingHandler::default());
    let b_handler = Arc::new(RecordingHandler::default());
    let mut a = node_controller(&shared, "a", a_handler.clone());
    let mut b = node_controller(&shared, "b", b_handler.clone());

    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Master);
    assert_eq!(*a_handler.master_calls.lock().unwrap(), 1);

    let outcome = b.run_tick().await.unwrap();
    assert_eq!(outcome, TickOutcome::Slave(NodeName::new("a")));
    assert_eq!(b_handler.slave_calls.lock().unwrap().clone(), vec![NodeName::new("a")]);
}

#[tokio::test]
async fn leader_failure_promotes_the_other_node() {
    let shared = Arc::new(MockCoordinator::new());
    let a_handler = Arc::new(RecordingHandler::default());
    let b_handler = Arc::new(RecordingHandler::default());
    let mut a = node_controller(&shared, "a", a_handler.clone());
    let mut b = node_controller(&shared, "b", b_handler.clone());

    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Master);
    assert_eq!(b.run_tick().await.unwrap(), TickOutcome::Slave(NodeName::new("a")));

    // A's health check starts failing; its session is invalidated.
    shared.set_healthy(&NodeName::new("a"), false);
    shared.invalidate_current_holder();
    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Unhealthy);

    // B now wins the lock.
    assert_eq!(b.run_tick().await.unwrap(), TickOutcome::Master);
    assert_eq!(*b_handler.master_calls.lock().unwrap(), 1);

    // A recovers and becomes a slave of B.
    shared.set_healthy(&NodeName::new("a"), true);
    let outcome = a.run_tick().await.unwrap();
    assert_eq!(outcome, TickOutcome::Slave(NodeName::new("b")));
}

#[tokio::test]
async fn disable_flag_forces_master_to_stand_down() {
    let shared = Arc::new(MockCoordinator::new());
    let dir = tempfile::tempdir().unwrap();
    let flag = dir.path().join("disable");

    let a_handler = Arc::new(RecordingHandler::default());
    let view: Arc<dyn failover_agent::consul::CoordinatorControl> =
        Arc::new(NodeView::new(shared.clone(), NodeName::new("a")));
    let mut a = FailoverController::new(
        view,
        a_handler.clone(),
        ClusterName::new("mysql-prod"),
        NodeName::new("a"),
        3306,
        check(),
        Duration::from_secs(1),
        flag.clone(),
    );

    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Master);

    std::fs::write(&flag, "").unwrap();
    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Disabled);
    assert_eq!(shared.tag_for(&NodeName::new("a")), Some("disabled".to_string()));

    std::fs::remove_file(&flag).unwrap();
    // A destroyed its session on disabling, releasing the lock, so it
    // re-acquires on a fresh session once re-enabled.
    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Master);
}

#[tokio::test]
async fn disabling_the_master_lets_another_node_take_over() {
    let shared = Arc::new(MockCoordinator::new());
    let dir = tempfile::tempdir().unwrap();
    let flag = dir.path().join("disable");

    let a_handler = Arc::new(RecordingHandler::default());
    let b_handler = Arc::new(RecordingHandler::default());
    let a_view: Arc<dyn failover_agent::consul::CoordinatorControl> =
        Arc::new(NodeView::new(shared.clone(), NodeName::new("a")));
    let mut a = FailoverController::new(
        a_view,
        a_handler.clone(),
        ClusterName::new("mysql-prod"),
        NodeName::new("a"),
        3306,
        check(),
        Duration::from_secs(1),
        flag.clone(),
    );
    let mut b = node_controller(&shared, "b", b_handler.clone());

    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Master);
    assert_eq!(b.run_tick().await.unwrap(), TickOutcome::Slave(NodeName::new("a")));

    std::fs::write(&flag, "").unwrap();
    assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Disabled);

    // A's session was destroyed, so the lock is free for B to take.
    assert_eq!(b.run_tick().await.unwrap(), TickOutcome::Master);
    assert_eq!(*b_handler.master_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn repeated_master_ticks_stay_idempotent() {
    let shared = Arc::new(MockCoordinator::new());
    let handler = Arc::new(RecordingHandler::default());
    let mut a = node_controller(&shared, "a", handler.clone());

    for _ in 0..5 {
        assert_eq!(a.run_tick().await.unwrap(), TickOutcome::Master);
    }
    assert_eq!(*handler.master_calls.lock().unwrap(), 5);
}
