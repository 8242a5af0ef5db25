//! A thin wrapper over Consul's session, KV, and catalog primitives. The
//! operation surface is deliberately narrow: only what the failover
//! controller needs — session create/destroy, KV acquire/get, catalog
//! registration and tagging, and health-check lookup. KV values travel
//! base64-encoded on the wire and are decoded on read.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use consul::agent::Agent;
use consul::kv::{KVPair, KV};
use consul::session::{Session, SessionEntry};
use consul::{Client, Config};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::errors::CoordinatorError;
use crate::role::{ClusterName, NodeName, SessionId};

/// A Consul HTTP health check, attached to a service registration and to
/// the session created against it.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// URL Consul polls, e.g. `http://127.0.0.1:8000/health`.
    pub http_url: String,
    pub interval: String,
    pub timeout: String,
}

/// What `kv_get` returns when the leader lock is currently held.
#[derive(Debug, Clone)]
pub struct LockHolder {
    pub session: SessionId,
    pub value: Vec<u8>,
}

/// The subset of Consul operations the failover controller (C4) depends
/// on. A trait so tests can substitute an in-memory double — see
/// `tests/support/mock_coordinator.rs`.
#[async_trait]
pub trait CoordinatorControl: Send + Sync {
    /// Services registered on the local Consul agent, name -> tags.
    async fn services_on_this_agent(
        &self,
    ) -> Result<HashMap<String, Vec<String>>, CoordinatorError>;

    /// Whether the agent's own health check for `cluster`'s service
    /// registration is currently in the `passing` state. A missing check
    /// counts as unhealthy.
    async fn is_healthy(&self, cluster: &ClusterName) -> Result<bool, CoordinatorError>;

    /// Idempotent registration. Overwrites the tag when `tag` is present.
    async fn register(
        &self,
        cluster: &ClusterName,
        port: u16,
        check: &HealthCheck,
        tag: Option<&str>,
    ) -> Result<(), CoordinatorError>;

    /// Removes the registration. No-op if absent.
    async fn deregister(&self, cluster: &ClusterName) -> Result<(), CoordinatorError>;

    /// Creates a session bound to `checks`, retrying indefinitely with a
    /// fixed 2s backoff on transient errors — the agent has no useful
    /// work without a session.
    async fn session_create(
        &self,
        cluster: &ClusterName,
        checks: &[String],
        lock_delay: Duration,
    ) -> SessionId;

    /// Best-effort session destruction.
    async fn session_destroy(&self, id: &SessionId);

    /// The session id if exactly one session named `cluster` exists on
    /// `node`; `None` if zero. Fails loudly (`CoordinatorError::MultipleSessions`)
    /// if more than one exists — this is an invariant violation, not a
    /// retryable condition.
    async fn existing_session(
        &self,
        node: &NodeName,
        cluster: &ClusterName,
    ) -> Result<Option<SessionId>, CoordinatorError>;

    /// Atomic compare-and-swap acquire of `key` bound to `session`.
    /// Returns true iff this session now owns the lock.
    async fn kv_acquire(&self, key: &str, session: &SessionId) -> Result<bool, CoordinatorError>;

    /// The current value/holder of `key`, or `None` if unheld.
    async fn kv_get(&self, key: &str) -> Result<Option<LockHolder>, CoordinatorError>;

    /// The node name bound to session `id`, or `None` if the session
    /// cannot be resolved (a transient race between a KV read and the
    /// session being invalidated/cleaned up).
    async fn session_info(&self, id: &SessionId) -> Result<Option<NodeName>, CoordinatorError>;

    /// Re-registers the service with `tag` replacing any prior tags.
    async fn set_tag(
        &self,
        cluster: &ClusterName,
        port: u16,
        check: &HealthCheck,
        tag: &str,
    ) -> Result<(), CoordinatorError>;
}

/// Bound on every individual Consul HTTP call. A call that exceeds this
/// surfaces `CoordinatorError::Timeout` rather than hanging the tick (or,
/// inside `session_create`'s retry loop, a single slow attempt) forever.
const COORDINATOR_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Production `CoordinatorControl`, backed by the `consul` crate's HTTP
/// client.
pub struct ConsulCoordinator {
    client: Client,
    node: NodeName,
}

impl ConsulCoordinator {
    /// `consul_addr` is e.g. `http://127.0.0.1:8500`; `token` is an
    /// optional ACL token read from `CONSUL_HTTP_TOKEN`.
    pub fn new(consul_addr: &str, token: Option<String>, node: NodeName) -> Self {
        let http_client = reqwest::ClientBuilder::new()
            .build()
            .expect("failed to build Consul HTTP client");
        let config = Config {
            address: consul_addr.to_string(),
            datacenter: None,
            http_client,
            token,
            wait_time: None,
        };
        Self {
            client: Client::new(config),
            node,
        }
    }

    /// The node name this adapter was constructed for — used by callers
    /// that need it alongside a `ClusterName` to look up an existing
    /// session without threading it through every call site.
    pub fn node(&self) -> &NodeName {
        &self.node
    }

    /// Runs `fut` under `COORDINATOR_CALL_TIMEOUT`, mapping an elapsed
    /// deadline to `CoordinatorError::Timeout` and any inner error to
    /// `CoordinatorError::Transient`.
    async fn with_timeout<T, E, F>(fut: F) -> Result<T, CoordinatorError>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(COORDINATOR_CALL_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CoordinatorError::Transient(e.to_string())),
            Err(_) => Err(CoordinatorError::Timeout(COORDINATOR_CALL_TIMEOUT)),
        }
    }

    fn decode_kv_value(raw: &str) -> Result<Vec<u8>, CoordinatorError> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| CoordinatorError::Transient(format!("invalid base64 in KV value: {e}")))
    }
}

#[async_trait]
impl CoordinatorControl for ConsulCoordinator {
    async fn services_on_this_agent(
        &self,
    ) -> Result<HashMap<String, Vec<String>>, CoordinatorError> {
        let services = Self::with_timeout(self.client.services(None)).await?.0;
        Ok(services
            .into_iter()
            .map(|(name, svc)| (name, svc.Tags.unwrap_or_default()))
            .collect())
    }

    async fn is_healthy(&self, cluster: &ClusterName) -> Result<bool, CoordinatorError> {
        let checks = Self::with_timeout(self.client.checks(None)).await?.0;

        let check_id = format!("service:{cluster}");
        Ok(checks
            .get(&check_id)
            .map(|c| c.Status == "passing")
            .unwrap_or(false))
    }

    async fn register(
        &self,
        cluster: &ClusterName,
        port: u16,
        check: &HealthCheck,
        tag: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let registration = consul::agent::AgentServiceRegistration {
            Name: cluster.as_str().to_string(),
            Port: Some(port as i64),
            Tags: tag.map(|t| vec![t.to_string()]),
            Check: Some(consul::agent::AgentServiceCheck {
                HTTP: Some(check.http_url.clone()),
                Interval: Some(check.interval.clone()),
                Timeout: Some(check.timeout.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        Self::with_timeout(self.client.register(&registration, None)).await?;

        info!(cluster = %cluster, tag = ?tag, "Registered service in Consul");
        Ok(())
    }

    async fn deregister(&self, cluster: &ClusterName) -> Result<(), CoordinatorError> {
        let services = self.services_on_this_agent().await?;
        if !services.contains_key(cluster.as_str()) {
            return Ok(());
        }

        Self::with_timeout(self.client.deregister(cluster.as_str(), None)).await?;

        info!(cluster = %cluster, "Deregistered service from Consul");
        Ok(())
    }

    async fn session_create(
        &self,
        cluster: &ClusterName,
        checks: &[String],
        lock_delay: Duration,
    ) -> SessionId {
        loop {
            let entry = SessionEntry {
                Name: Some(cluster.as_str().to_string()),
                Checks: Some(checks.to_vec()),
                LockDelay: Some(lock_delay.as_secs()),
                Behavior: Some("release".to_string()),
                ..Default::default()
            };

            match Self::with_timeout(self.client.create(&entry, None)).await {
                Ok((created, _)) => {
                    let id = created.ID.expect("Consul session response missing ID");
                    info!(cluster = %cluster, session = %id, "Created Consul session");
                    return SessionId::new(id);
                }
                Err(e) => {
                    warn!(cluster = %cluster, error = %e, "Error creating session, retrying in 2s");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    async fn session_destroy(&self, id: &SessionId) {
        if let Err(e) = Self::with_timeout(self.client.destroy(id.as_str(), None)).await {
            warn!(session = %id, error = %e, "Failed to destroy session (best-effort)");
        }
    }

    async fn existing_session(
        &self,
        node: &NodeName,
        cluster: &ClusterName,
    ) -> Result<Option<SessionId>, CoordinatorError> {
        let sessions = Self::with_timeout(self.client.node(node.as_str(), None))
            .await?
            .0;

        let matching: Vec<_> = sessions
            .into_iter()
            .filter(|s| s.Name.as_deref() == Some(cluster.as_str()))
            .collect();

        match matching.len() {
            0 => Ok(None),
            1 => Ok(matching[0].ID.clone().map(SessionId::new)),
            _ => Err(CoordinatorError::MultipleSessions {
                node: node.clone(),
                cluster: cluster.clone(),
            }),
        }
    }

    async fn kv_acquire(&self, key: &str, session: &SessionId) -> Result<bool, CoordinatorError> {
        let pair = KVPair {
            Key: key.to_string(),
            Value: String::new(),
            Session: Some(session.as_str().to_string()),
            ..Default::default()
        };

        let (acquired, _) = Self::with_timeout(self.client.acquire(&pair, None)).await?;
        Ok(acquired)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<LockHolder>, CoordinatorError> {
        let result = Self::with_timeout(self.client.get(key, None)).await?.0;

        let Some(kv) = result else {
            return Ok(None);
        };

        let Some(session) = kv.Session else {
            return Ok(None);
        };

        let value = Self::decode_kv_value(&kv.Value)?;
        Ok(Some(LockHolder {
            session: SessionId::new(session),
            value,
        }))
    }

    async fn session_info(&self, id: &SessionId) -> Result<Option<NodeName>, CoordinatorError> {
        // The Consul API returns an error for an unknown session id — and a
        // call that simply runs past its deadline is no more informative —
        // both count as "unresolvable", not a transient failure worth
        // retrying differently; the controller treats all three the same.
        match tokio::time::timeout(COORDINATOR_CALL_TIMEOUT, self.client.info(id.as_str(), None)).await {
            Ok(Ok((Some(entry), _))) => Ok(entry.Node.map(NodeName::new)),
            Ok(Ok((None, _))) => Ok(None),
            Ok(Err(_)) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    async fn set_tag(
        &self,
        cluster: &ClusterName,
        port: u16,
        check: &HealthCheck,
        tag: &str,
    ) -> Result<(), CoordinatorError> {
        self.register(cluster, port, check, Some(tag)).await
    }
}
