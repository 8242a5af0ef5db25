//! Demo binary wiring a no-op `AppHandler` to the core agent — exercises
//! `lifecycle::start` without a real managed service. The two example
//! handlers (`mysql-failover`, `solr-failover`) are the binaries meant for
//! production use; this one is mainly useful for smoke-testing a fresh
//! Consul cluster's session/lock wiring.

use std::sync::Arc;

use async_trait::async_trait;
use failover_agent::role::HealthVerdict;
use failover_agent::{config::Config, AppHandler, NodeName};

struct NoopHandler;

#[async_trait]
impl AppHandler for NoopHandler {
    async fn health(&self) -> HealthVerdict {
        HealthVerdict::ok("noop handler always healthy")
    }

    async fn ensure_master(&self) {
        tracing::info!("noop handler: would ensure_master here");
    }

    async fn ensure_slave(&self, master_node: NodeName) {
        tracing::info!(master = %master_node, "noop handler: would ensure_slave here");
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env(8000) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let handler: Arc<dyn AppHandler> = Arc::new(NoopHandler);
    failover_agent::start(handler, config).await;
}
