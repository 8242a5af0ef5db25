//! Example `AppHandler` for a Solr master/slave core pair.
//!
//! Master/slave state lives in each core's `core.properties` file
//! (`enable.master`/`enable.slave`), toggled by stopping Solr, rewriting
//! the files, and starting it back up — there is no live API for this
//! switch. A restart-timestamp file gives `health()` a bounded false
//! positive while a master is mid-restart, so the agent doesn't lose its
//! Consul lock to a slave during an expected few seconds of downtime.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use failover_agent::role::HealthVerdict;
use failover_agent::{config::Config, AppHandler, NodeName};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Drives Solr master/slave core failover via a Consul-backed agent")]
struct Args {
    #[arg(short = 'a', long, default_value_t = 8000)]
    api_port: u16,

    /// Solr's own HTTP API port.
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,

    /// Solr API path prefix.
    #[arg(short = 'u', long, default_value = "/solr")]
    base_uri: String,

    /// Base directory containing one subdirectory per core, each with a
    /// `core.properties` file.
    #[arg(short = 'b', long, default_value = "/var/lib/tomcat7multi/solr/solr")]
    base_dir: PathBuf,

    /// Seconds to wait for Solr to reach the desired state after a
    /// start/stop, and how long a restart flag stays valid.
    #[arg(long, default_value_t = 300)]
    restart_timeout: u64,

    #[arg(long, default_value = "/var/tmp/solr_restart.txt")]
    restart_flag_file: PathBuf,

    /// Service control command, e.g. `/etc/init.d/tomcat7-solr`. Templated
    /// as `{cmd} start`/`{cmd} stop`.
    #[arg(long, default_value = "/etc/init.d/tomcat7-solr")]
    service_control: String,
}

struct SolrHandler {
    http_client: reqwest::Client,
    port: u16,
    base_uri: String,
    base_dir: PathBuf,
    restart_timeout: Duration,
    restart_flag_file: PathBuf,
    service_control: String,
}

impl SolrHandler {
    fn flag_restart(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        if let Err(e) = fs::write(&self.restart_flag_file, now.to_string()) {
            warn!(error = %e, "failed to write restart flag file");
        }
    }

    fn is_restarting(&self) -> bool {
        let Ok(contents) = fs::read_to_string(&self.restart_flag_file) else {
            return false;
        };

        let Ok(restart_time) = contents.trim().parse::<f64>() else {
            warn!(path = ?self.restart_flag_file, "invalid timestamp in restart flag file");
            let _ = fs::remove_file(&self.restart_flag_file);
            return false;
        };

        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
            - restart_time;

        if elapsed < self.restart_timeout.as_secs_f64() {
            return true;
        }

        let _ = fs::remove_file(&self.restart_flag_file);
        false
    }

    async fn get_health(&self) -> HealthVerdict {
        let url = format!(
            "http://localhost:{}{}/admin/cores?action=STATUS&wt=json",
            self.port, self.base_uri
        );

        let response = match self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return HealthVerdict::unhealthy(format!("Unable to connect to Solr API: {e}")),
        };

        let status: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return HealthVerdict::unhealthy(format!("Unable to parse Solr API response: {e}")),
        };

        let Some(cores) = status.get("status").and_then(Value::as_object) else {
            return HealthVerdict::unhealthy("Unable to get core status from Solr API");
        };

        if cores.is_empty() {
            return HealthVerdict::unhealthy("No cores found");
        }

        for (name, core) in cores {
            let healthy = core.get("name").is_some() && core.get("uptime").is_some();
            if !healthy {
                return HealthVerdict::unhealthy(format!("Health check failed for core {name}"));
            }
        }

        HealthVerdict::ok(format!("Solr operating with {} cores", cores.len()))
    }

    fn control_solr(&self, want_up: bool) -> Result<()> {
        let verb = if want_up { "start" } else { "stop" };
        info!(verb, "controlling solr service");

        let output = Command::new(&self.service_control)
            .arg(verb)
            .output()
            .with_context(|| format!("failed to run {} {verb}", self.service_control))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} {verb} exited with {}: {}",
                self.service_control,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    async fn wait_solr(&self, want_up: bool) -> bool {
        let deadline = tokio::time::Instant::now() + self.restart_timeout;

        while tokio::time::Instant::now() < deadline {
            let verdict = self.get_health().await;
            if verdict.ok == want_up {
                return true;
            }
            sleep(Duration::from_secs(2)).await;
        }

        warn!(
            want_up,
            timeout_secs = self.restart_timeout.as_secs(),
            "solr did not reach desired state in time"
        );
        false
    }

    fn properties_line(config_type: &str) -> &'static str {
        match config_type {
            "master" => "enable.master=true\nenable.slave=false\n",
            "slave" => "enable.master=false\nenable.slave=true\n",
            other => unreachable!("invalid core config type: {other}"),
        }
    }

    fn properties_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.base_dir)
            .with_context(|| format!("failed to read {}", self.base_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let candidate = entry.path().join("core.properties");
            if candidate.is_file() {
                files.push(candidate);
            }
        }

        if files.is_empty() {
            anyhow::bail!("no core.properties files found under {}", self.base_dir.display());
        }
        Ok(files)
    }

    fn set_properties(&self, config_type: &str) -> Result<()> {
        let line = Self::properties_line(config_type);
        for file in self.properties_files()? {
            fs::write(&file, line).with_context(|| format!("failed to write {}", file.display()))?;
        }
        Ok(())
    }

    fn check_core_config(&self, config_type: &str) -> bool {
        let line = Self::properties_line(config_type);
        let Ok(files) = self.properties_files() else {
            return false;
        };
        files
            .iter()
            .all(|file| fs::read_to_string(file).map(|c| c == line).unwrap_or(false))
    }

    fn is_master(&self) -> bool {
        self.check_core_config("master")
    }

    fn is_slave(&self) -> bool {
        self.check_core_config("slave")
    }

    async fn restart_into(&self, config_type: &str) {
        self.flag_restart();

        let result: Result<()> = (|| {
            self.control_solr(false)?;
            self.set_properties(config_type)?;
            self.control_solr(true)?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!(error = %e, config_type, "failed to restart solr into new configuration");
            return;
        }

        if self.wait_solr(true).await {
            info!(config_type, "solr restarted successfully");
        } else {
            warn!(config_type, "solr failed to restart");
        }
    }
}

#[async_trait]
impl AppHandler for SolrHandler {
    async fn health(&self) -> HealthVerdict {
        // A restarting master gets a bounded false positive so it doesn't
        // lose the leader lock to the expected few seconds of downtime.
        if self.is_master() && self.is_restarting() {
            return HealthVerdict::ok("Master service is restarting");
        }
        self.get_health().await
    }

    async fn ensure_master(&self) {
        if self.is_master() {
            return;
        }
        info!("becoming master");
        self.restart_into("master").await;
    }

    async fn ensure_slave(&self, _master_node: NodeName) {
        if self.is_slave() {
            return;
        }
        info!("becoming a slave");
        self.restart_into("slave").await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env(args.port)?;
    config.api_port = args.api_port;

    let handler: std::sync::Arc<dyn AppHandler> = std::sync::Arc::new(SolrHandler {
        http_client: reqwest::Client::new(),
        port: args.port,
        base_uri: args.base_uri,
        base_dir: args.base_dir,
        restart_timeout: Duration::from_secs(args.restart_timeout),
        restart_flag_file: args.restart_flag_file,
        service_control: args.service_control,
    });

    failover_agent::start(handler, config).await;
}
