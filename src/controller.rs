//! The failover controller — the heart of the agent.
//!
//! Runs a fixed tick that classifies this node's health, contends for the
//! cluster's leader lock via Consul sessions, and drives the `AppHandler`
//! into master or slave mode accordingly. A single tick is a plain
//! function returning a `TickOutcome`, which keeps it testable without a
//! live Consul.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::consul::{CoordinatorControl, HealthCheck};
use crate::disable_flag;
use crate::errors::CoordinatorError;
use crate::handler::AppHandler;
use crate::role::{ClusterName, NodeName, Role, SessionId};

/// How often the controller re-evaluates health and leadership. Fixed,
/// not configurable — distinct from `FAILOVER_CHECK_INTERVAL`, the
/// interval Consul itself uses to poll this agent's health check.
const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// The checks a leader-lock session is bound to: Consul's own agent
/// liveness check plus this cluster's service check. If either stops
/// passing, Consul invalidates the session and releases the lock — this
/// is what makes failover safe across a hard node crash.
const SERF_HEALTH_CHECK: &str = "serfHealth";

/// Result of a single tick, returned mainly so tests can assert on it
/// without scraping log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// This node's own health check is not passing; role set to `Unhealthy`
    /// and no lock contention was attempted.
    Unhealthy,
    /// The disable flag file is present; role set to `Disabled` and no
    /// lock contention was attempted.
    Disabled,
    /// This node now holds (or already held) the leader lock.
    Master,
    /// Another node holds the lock; this node was (re)pointed at it.
    Slave(NodeName),
    /// The lock is held by a session that could not be resolved to a
    /// node — a transient race between a KV read and session cleanup.
    /// The controller does nothing and retries next tick.
    LeaderUnresolved,
    /// A coordinator call failed. The tick was abandoned; role is left
    /// as it was before the tick began.
    CoordinatorUnavailable,
}

/// Drives one cluster's worth of failover decisions for this node.
pub struct FailoverController {
    coordinator: Arc<dyn CoordinatorControl>,
    handler: Arc<dyn AppHandler>,
    cluster: ClusterName,
    node: NodeName,
    application_port: u16,
    check: HealthCheck,
    lock_delay: Duration,
    disable_flag_path: PathBuf,
    last_health: Option<bool>,
    last_disabled: Option<bool>,
}

impl FailoverController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coordinator: Arc<dyn CoordinatorControl>,
        handler: Arc<dyn AppHandler>,
        cluster: ClusterName,
        node: NodeName,
        application_port: u16,
        check: HealthCheck,
        lock_delay: Duration,
        disable_flag_path: PathBuf,
    ) -> Self {
        Self {
            coordinator,
            handler,
            cluster,
            node,
            application_port,
            check,
            lock_delay,
            disable_flag_path,
            last_health: None,
            last_disabled: None,
        }
    }

    /// Runs the tick loop until the process is asked to shut down or an
    /// invariant violation is observed. The caller (`lifecycle::start`) is
    /// responsible for cancelling this via `tokio::select!` against the
    /// signal futures in the ordinary case.
    pub async fn run(&mut self) -> ! {
        loop {
            match self.run_tick().await {
                Ok(outcome) => info!(cluster = %self.cluster, node = %self.node, outcome = ?outcome, "tick complete"),
                Err(e) if e.is_transient() => {
                    warn!(cluster = %self.cluster, error = %e, "tick failed, will retry")
                }
                Err(e) => {
                    // Not transient: an invariant violation (e.g. more than
                    // one session for this node/cluster). Per spec, only
                    // invariant violations are fatal — surface it and exit
                    // rather than retry forever against a state the agent
                    // cannot safely reconcile.
                    error!(cluster = %self.cluster, error = %e, "invariant violation, exiting");
                    std::process::exit(1);
                }
            }
            sleep(TICK_INTERVAL).await;
        }
    }

    /// A single iteration of the tick algorithm: health, disable flag,
    /// session, lock acquisition, then role action.
    pub async fn run_tick(&mut self) -> Result<TickOutcome, CoordinatorError> {
        // Step 1: consult coordinator-observed health for this node.
        let healthy = match self.coordinator.is_healthy(&self.cluster).await {
            Ok(healthy) => healthy,
            Err(e) if e.is_transient() => return Ok(self.abandon_tick(e)),
            Err(e) => return Err(e),
        };

        // Step 2: log on health transitions only, not every tick.
        if self.last_health != Some(healthy) {
            info!(cluster = %self.cluster, node = %self.node, healthy, "health state changed");
            self.last_health = Some(healthy);
        }

        // Step 3: unhealthy short-circuits the tick.
        if !healthy {
            self.set_tag_best_effort(Role::Unhealthy).await;
            return Ok(TickOutcome::Unhealthy);
        }

        // Step 4: an operator-set disable flag also short-circuits the
        // tick, independent of health.
        let disabled = disable_flag::is_set(&self.disable_flag_path);
        if self.last_disabled != Some(disabled) {
            info!(cluster = %self.cluster, node = %self.node, disabled, "disable flag state changed");
            self.last_disabled = Some(disabled);
        }
        if disabled {
            // A disabled node must not keep holding the leader lock: its
            // own health checks still pass, so Consul would never
            // invalidate the session on its own. Destroy it explicitly so
            // another candidate can acquire the lock on its next tick.
            if let Some(session) = self
                .coordinator
                .existing_session(&self.node, &self.cluster)
                .await?
            {
                self.coordinator.session_destroy(&session).await;
            }
            self.set_tag_best_effort(Role::Disabled).await;
            return Ok(TickOutcome::Disabled);
        }

        // Step 5: obtain or create a session bound to this node's checks.
        // Re-resolved every tick, not cached: a bound-check failure (this
        // node going unhealthy) destroys the session on the coordinator
        // side, so a cached id would otherwise go stale and never be
        // replaced, leaving the node unable to ever re-win leadership.
        let existing = self
            .coordinator
            .existing_session(&self.node, &self.cluster)
            .await?;
        let session = match existing {
            Some(session) => session,
            None => {
                let checks = vec![
                    SERF_HEALTH_CHECK.to_string(),
                    format!("service:{}", self.cluster),
                ];
                self.coordinator
                    .session_create(&self.cluster, &checks, self.lock_delay)
                    .await
            }
        };

        // Step 6: attempt to acquire the leader lock with that session.
        let lock_path = self.cluster.lock_path();
        let acquired = self.coordinator.kv_acquire(&lock_path, &session).await?;

        // Step 7: branch on whether this node now holds the lock.
        if acquired {
            self.handler.ensure_master().await;
            self.set_tag_best_effort(Role::Master).await;
            return Ok(TickOutcome::Master);
        }

        let holder = self.coordinator.kv_get(&lock_path).await?;
        let Some(holder) = holder else {
            // Lock momentarily unheld — another node released it and
            // hasn't re-acquired yet. Nothing to do until next tick.
            return Ok(TickOutcome::LeaderUnresolved);
        };

        let master_node = self.coordinator.session_info(&holder.session).await?;
        let Some(master_node) = master_node else {
            warn!(cluster = %self.cluster, "leader lock held by an unresolvable session, retrying next tick");
            return Ok(TickOutcome::LeaderUnresolved);
        };

        self.handler.ensure_slave(master_node.clone()).await;
        self.set_tag_best_effort(Role::Slave).await;
        Ok(TickOutcome::Slave(master_node))

        // Step 8 (sleep and repeat) lives in `run`.
    }

    async fn set_tag_best_effort(&self, role: Role) {
        if let Err(e) = self
            .coordinator
            .set_tag(&self.cluster, self.application_port, &self.check, role.as_tag())
            .await
        {
            warn!(cluster = %self.cluster, role = %role, error = %e, "failed to update service tag");
        }
    }

    fn abandon_tick(&self, e: CoordinatorError) -> TickOutcome {
        warn!(cluster = %self.cluster, error = %e, "coordinator unavailable, abandoning tick");
        TickOutcome::CoordinatorUnavailable
    }
}
