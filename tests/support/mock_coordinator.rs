//! In-memory `CoordinatorControl` double shared by the scenario tests.
//! Models just enough of Consul's session/KV/tag semantics to drive
//! multi-node failover scenarios without a live cluster: one leader-lock
//! slot, sessions keyed by node, and a per-node health flag.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use failover_agent::consul::{CoordinatorControl, HealthCheck, LockHolder};
use failover_agent::errors::CoordinatorError;
use failover_agent::{ClusterName, NodeName};

struct SessionRecord {
    node: NodeName,
}

#[derive(Default)]
pub struct MockCoordinator {
    healthy: Mutex<HashMap<NodeName, bool>>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    sessions_by_node: Mutex<HashMap<NodeName, String>>,
    lock_holder: Mutex<Option<String>>,
    next_session: Mutex<u32>,
    pub last_tag: Mutex<HashMap<NodeName, String>>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the health this node's check will report on its next tick.
    pub fn set_healthy(&self, node: &NodeName, healthy: bool) {
        self.healthy.lock().unwrap().insert(node.clone(), healthy);
    }

    /// Forcibly invalidates whatever session currently holds the lock —
    /// simulates the coordinator expiring a session after a health check
    /// stops passing (scenario 3, "leader failure").
    pub fn invalidate_current_holder(&self) {
        let mut holder = self.lock_holder.lock().unwrap();
        if let Some(session) = holder.take() {
            self.sessions.lock().unwrap().remove(&session);
            let mut by_node = self.sessions_by_node.lock().unwrap();
            by_node.retain(|_, s| s != &session);
        }
    }

    pub fn tag_for(&self, node: &NodeName) -> Option<String> {
        self.last_tag.lock().unwrap().get(node).cloned()
    }
}

/// The coordinator call sites in `FailoverController` always act on behalf
/// of one node at a time, but the mock is shared across multiple
/// `ConsulCoordinator`-like facades (one per simulated node) via this
/// thin per-node view.
pub struct NodeView {
    shared: std::sync::Arc<MockCoordinator>,
    node: NodeName,
}

impl NodeView {
    pub fn new(shared: std::sync::Arc<MockCoordinator>, node: NodeName) -> Self {
        Self { shared, node }
    }
}

#[async_trait]
impl CoordinatorControl for NodeView {
    async fn services_on_this_agent(&self) -> Result<HashMap<String, Vec<String>>, CoordinatorError> {
        Ok(HashMap::new())
    }

    async fn is_healthy(&self, _cluster: &ClusterName) -> Result<bool, CoordinatorError> {
        Ok(self
            .shared
            .healthy
            .lock()
            .unwrap()
            .get(&self.node)
            .copied()
            .unwrap_or(true))
    }

    async fn register(
        &self,
        _cluster: &ClusterName,
        _port: u16,
        _check: &HealthCheck,
        _tag: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn deregister(&self, _cluster: &ClusterName) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn session_create(
        &self,
        _cluster: &ClusterName,
        _checks: &[String],
        _lock_delay: Duration,
    ) -> failover_agent::role::SessionId {
        let mut n = self.shared.next_session.lock().unwrap();
        *n += 1;
        let id = format!("session-{n}");
        self.shared.sessions.lock().unwrap().insert(
            id.clone(),
            SessionRecord {
                node: self.node.clone(),
            },
        );
        self.shared
            .sessions_by_node
            .lock()
            .unwrap()
            .insert(self.node.clone(), id.clone());
        failover_agent::role::SessionId::new(id)
    }

    async fn session_destroy(&self, id: &failover_agent::role::SessionId) {
        self.shared.sessions.lock().unwrap().remove(id.as_str());
        self.shared
            .sessions_by_node
            .lock()
            .unwrap()
            .retain(|_, s| s != id.as_str());

        // Destroying a session that currently holds the leader lock
        // releases it, mirroring Consul's "release" session behavior.
        let mut holder = self.shared.lock_holder.lock().unwrap();
        if holder.as_deref() == Some(id.as_str()) {
            *holder = None;
        }
    }

    async fn existing_session(
        &self,
        node: &NodeName,
        _cluster: &ClusterName,
    ) -> Result<Option<failover_agent::role::SessionId>, CoordinatorError> {
        Ok(self
            .shared
            .sessions_by_node
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .map(failover_agent::role::SessionId::new))
    }

    async fn kv_acquire(
        &self,
        _key: &str,
        session: &failover_agent::role::SessionId,
    ) -> Result<bool, CoordinatorError> {
        // A session that no longer exists (invalidated) cannot acquire.
        if !self
            .shared
            .sessions
            .lock()
            .unwrap()
            .contains_key(session.as_str())
        {
            return Ok(false);
        }

        let mut holder = self.shared.lock_holder.lock().unwrap();
        match holder.as_ref() {
            None => {
                *holder = Some(session.as_str().to_string());
                Ok(true)
            }
            Some(current) => Ok(current == session.as_str()),
        }
    }

    async fn kv_get(&self, _key: &str) -> Result<Option<LockHolder>, CoordinatorError> {
        Ok(self
            .shared
            .lock_holder
            .lock()
            .unwrap()
            .clone()
            .map(|session| LockHolder {
                session: failover_agent::role::SessionId::new(session),
                value: Vec::new(),
            }))
    }

    async fn session_info(
        &self,
        id: &failover_agent::role::SessionId,
    ) -> Result<Option<NodeName>, CoordinatorError> {
        Ok(self
            .shared
            .sessions
            .lock()
            .unwrap()
            .get(id.as_str())
            .map(|record| record.node.clone()))
    }

    async fn set_tag(
        &self,
        _cluster: &ClusterName,
        _port: u16,
        _check: &HealthCheck,
        tag: &str,
    ) -> Result<(), CoordinatorError> {
        self.shared
            .last_tag
            .lock()
            .unwrap()
            .insert(self.node.clone(), tag.to_string());
        Ok(())
    }
}
