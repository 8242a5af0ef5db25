//! Error taxonomy for the coordinator adapter and configuration layer.
//! Every failure mode the coordinator adapter can surface is a
//! `CoordinatorError` variant; the controller treats any variant other
//! than `MultipleSessions` as transient and moves on to the next tick.

use thiserror::Error;

use crate::role::{ClusterName, NodeName};

/// Errors surfaced by the coordinator adapter (C3).
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Any transient failure talking to Consul: connection refused, a
    /// non-2xx response, a decode failure. The controller logs this and
    /// skips the remainder of the tick; role is left unchanged.
    #[error("coordinator request failed: {0}")]
    Transient(String),

    /// A coordinator call did not complete within its per-call timeout.
    /// Treated identically to `Transient` by the controller, kept as a
    /// distinct variant so it can be logged and alerted on separately.
    #[error("coordinator request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// More than one session named `cluster` exists for `node`. This
    /// violates the single-session-per-(node, cluster) invariant and is
    /// fatal — it indicates the coordinator or a previous agent instance
    /// is in a state this agent cannot safely reconcile.
    #[error("multiple {cluster} sessions found for node {node} — invariant violated")]
    MultipleSessions { node: NodeName, cluster: ClusterName },
}

impl CoordinatorError {
    /// True for every variant the controller should treat as "unknown,
    /// retry next tick" rather than fatal.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CoordinatorError::MultipleSessions { .. })
    }
}

/// Errors raised while building a `Config` from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("invalid duration for {var}: {message}")]
    InvalidDuration { var: String, message: String },
}
