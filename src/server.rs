//! Shared-server connection conventions and the script-execution seam.
//!
//! Townkeeper talks to the town's Dolt server through one narrow trait:
//! hand it a SQL script, get back stdout or an error whose text is
//! classifiable. The production implementation shells out to the `dolt`
//! binary; tests substitute scripted mocks.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::TownConfig;

/// `host:port` of the shared server.
pub fn server_addr(config: &TownConfig) -> String {
    format!("{}:{}", config.host, config.port)
}

/// Deterministic connection string: fixed user, fixed host/port, optional
/// trailing database segment.
pub fn connection_string(config: &TownConfig, database: Option<&str>) -> String {
    match database {
        Some(db) => format!(
            "mysql://{}@{}:{}/{}",
            config.user, config.host, config.port, db
        ),
        None => format!("mysql://{}@{}:{}", config.user, config.host, config.port),
    }
}

/// Script execution against the shared server.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run a SQL script, optionally scoped to one database. Returns the
    /// server's output on success; the error text on failure is what the
    /// retry classifier inspects.
    async fn run_script(&self, database: Option<&str>, script: &str) -> Result<String>;
}

/// Production runner: the `dolt` CLI in sql-client mode with CSV output.
pub struct DoltCli {
    config: TownConfig,
}

impl DoltCli {
    pub fn new(config: TownConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ScriptRunner for DoltCli {
    async fn run_script(&self, database: Option<&str>, script: &str) -> Result<String> {
        let mut cmd = Command::new(&self.config.dolt_bin);
        cmd.arg("sql-client")
            .args(["--host", &self.config.host])
            .args(["--port", &self.config.port.to_string()])
            .args(["-u", &self.config.user])
            .args(["-r", "csv"]);
        if let Some(db) = database {
            cmd.args(["--use-db", db]);
        }
        cmd.args(["-q", script]);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Running dolt script against {}: {}",
            server_addr(&self.config),
            script.lines().next().unwrap_or("")
        );

        let script_timeout = Duration::from_millis(self.config.script_timeout_ms);
        let output = timeout(script_timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow!(
                    "dolt script timed out after {}ms",
                    self.config.script_timeout_ms
                )
            })?
            .context("Failed to spawn dolt")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(anyhow!("dolt script failed ({}): {}", output.status, detail))
        }
    }
}

/// Pull the scalar out of a CSV result set: the first data line after the
/// header row.
pub(crate) fn parse_csv_scalar(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(1)
        .map(str::to_string)
}

/// MySQL globals come back as 0/1, sometimes true/false.
pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true")
}
