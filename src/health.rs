//! Health metrics and admission control for the shared Dolt server.
//!
//! Probe results are `Option`-typed: `None` means "could not measure",
//! which is never conflated with a measured zero. Admission control fails
//! closed: when the gate's state cannot be verified, the gate stays shut.

use anyhow::Result;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::DEFAULT_MAX_CONNECTIONS;
use crate::error::KeeperError;
use crate::server::{ScriptRunner, parse_csv_scalar, parse_flag, server_addr};
use crate::town::Town;

const CONNECTION_COUNT_QUERY: &str =
    "select count(*) from information_schema.processlist;";
const MAX_CONNECTIONS_QUERY: &str = "select @@global.max_connections;";
const READ_ONLY_QUERY: &str = "select @@global.read_only;";
const PING_QUERY: &str = "select 1;";

/// Point-in-time health of the shared deployment.
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    /// Recursive size of the shared data root (0 when absent).
    pub data_dir_bytes: u64,
    pub data_dir_human: String,

    /// Current server connection count; `None` when the server could not be
    /// probed.
    pub connections: Option<u32>,

    /// Round-trip latency of a trivial query; `None` when unmeasurable.
    pub latency: Option<Duration>,

    /// Admission ceiling (configured, or server-reported when the config is
    /// left at its default).
    pub max_connections: u32,

    /// Whether the server is in read-only mode; `None` when unreachable.
    pub read_only: Option<bool>,
}

impl HealthMetrics {
    /// One-line operator summary. Absent probes render as "unreachable"
    /// rather than fake zeros.
    pub fn summary(&self) -> String {
        let server = match self.connections {
            Some(n) => {
                let latency = self
                    .latency
                    .map(|d| format!(", {}ms latency", d.as_millis()))
                    .unwrap_or_default();
                let read_only = if self.read_only == Some(true) {
                    ", read-only"
                } else {
                    ""
                };
                format!(
                    "{}/{} connections{}{}",
                    n, self.max_connections, latency, read_only
                )
            }
            None => "server unreachable".to_string(),
        };
        format!("{} on disk, {}", self.data_dir_human, server)
    }
}

/// Fail-closed admission decision.
#[derive(Debug, Clone)]
pub struct CapacityCheck {
    pub has_capacity: bool,
    pub current: Option<u32>,
    pub limit: u32,
    /// The probe failure that forced a closed gate, when there was one.
    pub error: Option<String>,
}

/// Recursive disk usage of a directory tree. 0 when the path is absent.
pub fn disk_usage(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Human-readable byte count: binary units, one decimal from KB upward.
pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

/// Succeeds only when a TCP connection to the conventional address does.
pub async fn check_server_reachable(town: &Town) -> Result<()> {
    let config = town.config()?;
    let addr = server_addr(&config);
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

    match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(KeeperError::ServerUnreachable {
            addr,
            detail: e.to_string(),
        }
        .into()),
        Err(_) => Err(KeeperError::ServerUnreachable {
            addr,
            detail: format!("connect timed out after {}ms", config.connect_timeout_ms),
        }
        .into()),
    }
}

/// Gather health metrics. An unreachable server is not an error here;
/// the probe fields simply come back `None`.
pub async fn get_health_metrics(town: &Town, runner: &dyn ScriptRunner) -> Result<HealthMetrics> {
    let config = town.config()?;
    let data_dir_bytes = disk_usage(&town.dolt_data_root());

    let mut metrics = HealthMetrics {
        data_dir_bytes,
        data_dir_human: human_bytes(data_dir_bytes),
        connections: None,
        latency: None,
        max_connections: config.max_connections,
        read_only: None,
    };

    if let Err(e) = check_server_reachable(town).await {
        debug!("Skipping server probes: {:#}", e);
        return Ok(metrics);
    }

    let started = Instant::now();
    if runner.run_script(None, PING_QUERY).await.is_ok() {
        metrics.latency = Some(started.elapsed());
    }

    if let Ok(output) = runner.run_script(None, CONNECTION_COUNT_QUERY).await {
        metrics.connections = parse_csv_scalar(&output).and_then(|v| v.parse().ok());
    }

    // Only defer to the server's limit when the operator left ours alone.
    if metrics.max_connections == DEFAULT_MAX_CONNECTIONS {
        if let Ok(output) = runner.run_script(None, MAX_CONNECTIONS_QUERY).await {
            if let Some(limit) = parse_csv_scalar(&output).and_then(|v| v.parse().ok()) {
                metrics.max_connections = limit;
            }
        }
    }

    if let Ok(output) = runner.run_script(None, READ_ONLY_QUERY).await {
        metrics.read_only = parse_csv_scalar(&output).map(|v| parse_flag(&v));
    }

    Ok(metrics)
}

/// Fail-closed capacity check: any probe failure denies admission and
/// records why.
pub async fn has_connection_capacity(
    town: &Town,
    runner: &dyn ScriptRunner,
) -> Result<CapacityCheck> {
    let config = town.config()?;
    let mut limit = config.max_connections;

    match runner.run_script(None, CONNECTION_COUNT_QUERY).await {
        Ok(output) => match parse_csv_scalar(&output).and_then(|v| v.parse::<u32>().ok()) {
            Some(current) => {
                if limit == DEFAULT_MAX_CONNECTIONS {
                    if let Ok(output) = runner.run_script(None, MAX_CONNECTIONS_QUERY).await {
                        if let Some(reported) =
                            parse_csv_scalar(&output).and_then(|v| v.parse().ok())
                        {
                            limit = reported;
                        }
                    }
                }
                Ok(CapacityCheck {
                    has_capacity: current < limit,
                    current: Some(current),
                    limit,
                    error: None,
                })
            }
            None => Ok(CapacityCheck {
                has_capacity: false,
                current: None,
                limit,
                error: Some(format!("unparseable connection count: {output:?}")),
            }),
        },
        Err(e) => Ok(CapacityCheck {
            has_capacity: false,
            current: None,
            limit,
            error: Some(format!("{e:#}")),
        }),
    }
}
