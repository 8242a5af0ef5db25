//! Core data model: cluster/node identity and the agent's view of its own
//! role. `ClusterName` and `NodeName` are thin newtypes so the controller
//! and adapter can't accidentally swap a node name for a cluster name at
//! a call site — both are plain strings on the wire, but the type system
//! keeps them apart here.

use std::fmt;

/// Identifies the logical cluster. Shared by every agent instance that
/// contends for the same leader lock; used as the Consul service name,
/// lock key prefix, and session name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterName(String);

impl ClusterName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The KV path of the leader lock for this cluster: `lock/<name>/leader`.
    pub fn lock_path(&self) -> String {
        format!("lock/{}/leader", self.0)
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies this host to the coordinator. Stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Consul session id, returned by `session_create` and threaded through
/// every subsequent KV acquire/release for the lifetime of the candidacy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The agent's view of its own role. Recomputed every tick, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initial state, before the first tick has classified health.
    Unknown,
    Master,
    Slave,
    Unhealthy,
    Disabled,
}

impl Role {
    /// The single Consul service tag this role maps to. `Unknown` never
    /// reaches the wire — it's resolved to one of the other four states
    /// within the first tick.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::Master => "master",
            Role::Slave => "slave",
            Role::Unhealthy => "unhealthy",
            Role::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// Health as reported by `AppHandler::health()`. Not persisted — computed
/// fresh on every HTTP probe.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HealthVerdict {
    pub ok: bool,
    pub message: String,
}

impl HealthVerdict {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}
