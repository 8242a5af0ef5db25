//! Per-host sidecar that drives active/passive failover for a replicated
//! service (MySQL, Solr, or any other service an `AppHandler` is written
//! for) using Consul sessions, locks, and health checks.
//!
//! Module layout:
//!
//! - [`handler`] — the `AppHandler` trait a managed service implements.
//! - [`health_server`] — the `GET /health` HTTP endpoint.
//! - [`consul`] — the coordinator adapter over Consul's HTTP API.
//! - [`controller`] — the failover tick state machine.
//! - [`lifecycle`] — process wiring and graceful shutdown.
//! - [`disable_flag`] — the operator override.
//! - [`role`] — the shared data model (cluster/node identity, roles).
//! - [`config`] — the environment-variable configuration surface.
//! - [`errors`] — the error taxonomy.

pub mod config;
pub mod consul;
pub mod controller;
pub mod disable_flag;
pub mod errors;
pub mod handler;
pub mod health_server;
pub mod lifecycle;
pub mod role;

pub use handler::AppHandler;
pub use lifecycle::start;
pub use role::{ClusterName, HealthVerdict, NodeName, Role};
