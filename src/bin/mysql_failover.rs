//! Example `AppHandler` for a MySQL primary/replica pair.
//!
//! Connection pooling and reconnection are handled by `sqlx::MySqlPool`
//! rather than a hand-rolled connect lock. `ensure_master` implements the
//! catch-up-aware variant: if this host is still replicating, it only
//! promotes once the replica has caught up to the former master,
//! declining (returning without effect) otherwise so the controller
//! retries next tick rather than risk losing committed writes.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use failover_agent::role::HealthVerdict;
use failover_agent::{config::Config, AppHandler, NodeName};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Drives MySQL primary/replica failover via a Consul-backed agent")]
struct Args {
    /// HTTP port for the health/API server.
    #[arg(short = 'a', long, default_value_t = 8000)]
    api_port: u16,

    /// MySQL port on this host.
    #[arg(short = 'P', long, default_value_t = 3306)]
    port: u16,

    /// Databases that must be present for this host to report healthy.
    #[arg(short = 'd', long, value_delimiter = ',', default_value = "mysql")]
    require_databases: Vec<String>,

    /// Replication username.
    #[arg(short = 'e', long, default_value = "replication")]
    replication_user: String,

    /// Replication password. Read from `FAILOVER_MYSQL_REPLICATION_PASSWORD`
    /// if not given on the command line, to avoid forcing it into shell
    /// history.
    #[arg(short = 'r', long)]
    replication_password: Option<String>,

    /// MySQL connection URL, e.g. `mysql://root@127.0.0.1/`. Defaults to a
    /// local socket connection as root, for a colocated agent.
    #[arg(long, default_value = "mysql://root@127.0.0.1/")]
    database_url: String,
}

struct MysqlHandler {
    pool: MySqlPool,
    port: u16,
    replication_user: String,
    replication_password: String,
    require_databases: Vec<String>,
}

/// The subset of `SHOW SLAVE STATUS` columns this handler inspects.
struct SlaveStatus {
    master_host: Option<String>,
    slave_io_running: String,
    slave_sql_running: String,
    seconds_behind_master: Option<i64>,
}

impl MysqlHandler {
    async fn slave_status(&self) -> Option<SlaveStatus> {
        let row = sqlx::query("SHOW SLAVE STATUS")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| warn!(error = %e, "SHOW SLAVE STATUS failed"))
            .ok()
            .flatten()?;

        Some(SlaveStatus {
            master_host: row.try_get("Master_Host").ok(),
            slave_io_running: row.try_get("Slave_IO_Running").unwrap_or_default(),
            slave_sql_running: row.try_get("Slave_SQL_Running").unwrap_or_default(),
            seconds_behind_master: row.try_get("Seconds_Behind_Master").ok(),
        })
    }

    async fn read_only(&self) -> Option<bool> {
        let row = sqlx::query("SELECT @@read_only AS read_only")
            .fetch_one(&self.pool)
            .await
            .ok()?;
        let value: i64 = row.try_get("read_only").ok()?;
        Some(value != 0)
    }

    async fn set_read_only(&self, value: bool) {
        let flag = if value { 1 } else { 0 };
        if let Err(e) = sqlx::query(&format!("SET GLOBAL read_only = {flag}"))
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "failed to set read_only");
        }
    }
}

#[async_trait]
impl AppHandler for MysqlHandler {
    async fn health(&self) -> HealthVerdict {
        let rows = match sqlx::query("SHOW DATABASES").fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => return HealthVerdict::unhealthy(format!("Error running SHOW DATABASES: {e}")),
        };

        let databases: Vec<String> = rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("Database").ok())
            .collect();

        let missing: Vec<&String> = self
            .require_databases
            .iter()
            .filter(|db| !databases.contains(db))
            .collect();

        if !missing.is_empty() {
            let missing = missing
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return HealthVerdict::unhealthy(format!(
                "The following databases are missing on this server: {missing}"
            ));
        }

        HealthVerdict::ok(format!(
            "MySQL serving required databases: {}",
            self.require_databases.join(", ")
        ))
    }

    async fn ensure_master(&self) {
        let Some(status) = self.slave_status().await else {
            // Not replicating at all — just make sure writes are open.
            if self.read_only().await == Some(true) {
                info!("setting read_only off");
                self.set_read_only(false).await;
            }
            return;
        };

        // Still replicating. The safer variant: only promote once caught
        // up, otherwise decline and let the controller retry next tick.
        let caught_up = status.seconds_behind_master == Some(0);
        if !caught_up {
            info!(
                seconds_behind_master = ?status.seconds_behind_master,
                "declining to promote: still catching up to former master"
            );
            return;
        }

        info!("becoming master");
        let _ = sqlx::query("STOP SLAVE").execute(&self.pool).await;
        let _ = sqlx::query("RESET SLAVE ALL").execute(&self.pool).await;
        self.set_read_only(false).await;
    }

    async fn ensure_slave(&self, master_node: NodeName) {
        let master_host = master_node.as_str();
        let status = self.slave_status().await;

        let already_slaved_correctly = status
            .as_ref()
            .map(|s| s.master_host.as_deref() == Some(master_host))
            .unwrap_or(false);

        if !already_slaved_correctly {
            info!(master = %master_node, "becoming a slave");
            let _ = sqlx::query("FLUSH LOCAL TABLES WITH READ LOCK")
                .execute(&self.pool)
                .await;
            self.set_read_only(true).await;
            let _ = sqlx::query("UNLOCK TABLES").execute(&self.pool).await;
            let _ = sqlx::query("STOP SLAVE").execute(&self.pool).await;
            let _ = sqlx::query("RESET SLAVE ALL").execute(&self.pool).await;

            let change_master = format!(
                "CHANGE MASTER TO MASTER_HOST='{master_host}', MASTER_PORT={}, MASTER_USER='{}', MASTER_PASSWORD='{}', MASTER_AUTO_POSITION=1",
                self.port, self.replication_user, self.replication_password
            );
            if let Err(e) = sqlx::query(&change_master).execute(&self.pool).await {
                warn!(error = %e, "CHANGE MASTER TO failed");
                return;
            }
            let _ = sqlx::query("START SLAVE").execute(&self.pool).await;
            return;
        }

        if let Some(status) = &status {
            if status.slave_io_running != "Yes" || status.slave_sql_running != "Yes" {
                info!("slave threads are not running, restarting them");
                let _ = sqlx::query("STOP SLAVE").execute(&self.pool).await;
                let _ = sqlx::query("START SLAVE").execute(&self.pool).await;
            }
        }

        if self.read_only().await != Some(true) {
            info!("setting host read-only");
            self.set_read_only(true).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let replication_password = match args.replication_password {
        Some(password) => password,
        None => Config::env_required("FAILOVER_MYSQL_REPLICATION_PASSWORD")
            .context("replication password must be passed as --replication-password or FAILOVER_MYSQL_REPLICATION_PASSWORD")?,
    };

    let mut config = Config::from_env(args.port)?;
    config.api_port = args.api_port;

    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await
        .context("failed to connect to MySQL")?;

    let handler: Arc<dyn AppHandler> = Arc::new(MysqlHandler {
        pool,
        port: args.port,
        replication_user: args.replication_user,
        replication_password,
        require_databases: args.require_databases,
    });

    failover_agent::start(handler, config).await;
}
