//! Daemon state document for the shared Dolt server process.
//!
//! Townkeeper never starts or stops the server; it only records and reads
//! what the supervisor wrote here. An absent file means "not running". A
//! file that exists but does not parse is a hard error; resetting it
//! silently could orphan a live server process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KeeperError;
use crate::town::Town;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    #[serde(default)]
    pub running: bool,

    #[serde(default)]
    pub pid: u32,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub data_dir: String,

    /// Database names the server was started with.
    #[serde(default)]
    pub databases: Vec<String>,
}

/// Load daemon state. Absent file ⇒ default (not running).
pub fn load_daemon_state(town: &Town) -> Result<DaemonState> {
    let path = town.daemon_state_path();
    if !path.exists() {
        debug!("No daemon state at {}, assuming not running", path.display());
        return Ok(DaemonState::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read daemon state at {}", path.display()))?;

    serde_json::from_str(&contents).map_err(|e| {
        KeeperError::CorruptDaemonState {
            path: path.clone(),
            detail: e.to_string(),
        }
        .into()
    })
}

/// Write daemon state atomically (temp file + rename).
pub fn save_daemon_state(town: &Town, state: &DaemonState) -> Result<()> {
    let path = town.daemon_state_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let contents =
        serde_json::to_string_pretty(state).context("Failed to serialize daemon state")?;

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, &contents)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, &path)
        .with_context(|| format!("Failed to rename {} → {}", temp_path.display(), path.display()))?;

    Ok(())
}
