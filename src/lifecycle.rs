//! Process wiring and graceful shutdown: registers with Consul, starts the
//! health API server and the failover controller, and races both against
//! termination signals. The health server and the controller share a
//! single `Arc<dyn AppHandler>` and a single `Arc<dyn CoordinatorControl>`
//! so that probe results and reconfiguration never see divergent state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::config::Config;
use crate::consul::{ConsulCoordinator, CoordinatorControl, HealthCheck};
use crate::controller::FailoverController;
use crate::handler::AppHandler;
use crate::role::NodeName;

/// Brings the agent up: registers with Consul, starts the health API
/// server, and runs the failover controller until a shutdown signal
/// arrives. Exits the process directly rather than returning, since there
/// is nothing left for a caller to do after shutdown.
pub async fn start(handler: Arc<dyn AppHandler>, config: Config) -> ! {
    init_logging(&config.log_level);

    let coordinator: Arc<dyn CoordinatorControl> = Arc::new(ConsulCoordinator::new(
        &config.consul_addr,
        config.consul_token.clone(),
        config.node_name.clone(),
    ));

    let check = HealthCheck {
        http_url: format!("http://127.0.0.1:{}/health", config.api_port),
        interval: format!("{}s", config.check_interval.as_secs()),
        timeout: "5s".to_string(),
    };

    if let Err(e) = coordinator
        .register(&config.cluster_name, config.application_port, &check, Some("unknown"))
        .await
    {
        error!(error = %e, "failed to register with Consul, exiting");
        std::process::exit(1);
    }
    info!(
        cluster = %config.cluster_name,
        node = %config.node_name,
        "registered with Consul, starting health server and controller"
    );

    let health_addr: SocketAddr = format!("0.0.0.0:{}", config.api_port)
        .parse()
        .expect("api_port produces a valid socket address");

    let mut controller = FailoverController::new(
        coordinator.clone(),
        handler.clone(),
        config.cluster_name.clone(),
        config.node_name.clone(),
        config.application_port,
        check,
        config.lock_delay,
        PathBuf::from(&config.disable_flag_path),
    );

    let health_handler = handler.clone();
    let health_task = tokio::spawn(async move {
        crate::health_server::serve(health_addr, health_handler).await;
    });

    tokio::select! {
        _ = controller.run() => unreachable!("controller::run never returns"),
        _ = health_task => error!("health API server task exited unexpectedly"),
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received, deregistering from Consul");
            shutdown(coordinator.as_ref(), &config.cluster_name, &config.node_name).await;
        }
    }

    std::process::exit(0);
}

/// Resolves once either `SIGINT` or `SIGTERM` is observed.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    let terminate = async {
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Deregisters first, then destroys the session — matching the order spec
/// §4.5/§7/P5 all state ("deregister-then-destroy-session is observed
/// before process exit"), rather than the reverse order the original
/// Python's `graceful_exit()` happens to use.
async fn shutdown(
    coordinator: &dyn CoordinatorControl,
    cluster: &crate::role::ClusterName,
    node: &NodeName,
) {
    if let Err(e) = coordinator.deregister(cluster).await {
        error!(cluster = %cluster, error = %e, "failed to deregister during shutdown");
    }
    if let Ok(Some(session)) = coordinator.existing_session(node, cluster).await {
        coordinator.session_destroy(&session).await;
    }
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
