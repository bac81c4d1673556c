//! Shared test fixtures: temp towns, rig builders, and a scripted mock
//! runner standing in for the dolt CLI.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

use crate::server::ScriptRunner;
use crate::town::{BEADS_DIR, HQ_RIG, LEGACY_DOLT_DIR, Town};

/// A fresh town rooted in a TempDir. Keep the TempDir alive for the test's
/// duration.
pub fn temp_town() -> (TempDir, Town) {
    let dir = TempDir::new().unwrap();
    let town = Town::new(dir.path());
    (dir, town)
}

/// Write a config.toml for the town (creating `.town/` as needed).
pub fn write_config(town: &Town, contents: &str) {
    std::fs::create_dir_all(town.town_dir()).unwrap();
    std::fs::write(town.config_path(), contents).unwrap();
}

/// Config pointing at a port nothing listens on, with a short timeout so
/// reachability checks fail fast.
pub fn write_unreachable_config(town: &Town) {
    write_config(town, "port = 1\nconnect_timeout_ms = 200\n");
}

/// Path of a rig's beads directory under the nested convention.
pub fn beads_dir(town: &Town, rig: &str) -> PathBuf {
    if rig == HQ_RIG {
        town.hq_beads_dir()
    } else {
        town.rig_dir(rig).join(BEADS_DIR)
    }
}

/// Seed a rig with one legacy embedded database containing a marker file.
/// Returns the database directory (the migration source).
pub fn seed_legacy_rig(town: &Town, rig: &str, db: &str, marker: &str) -> PathBuf {
    let db_dir = beads_dir(town, rig).join(LEGACY_DOLT_DIR).join(db);
    std::fs::create_dir_all(db_dir.join(".dolt")).unwrap();
    std::fs::write(db_dir.join(".dolt").join("noms"), marker).unwrap();
    db_dir
}

/// Scripted ScriptRunner: pops queued responses, falls back to a default,
/// and records every call for assertions.
pub struct MockRunner {
    queue: Mutex<VecDeque<Result<String, String>>>,
    default: Result<String, String>,
    calls: Mutex<Vec<(Option<String>, String)>>,
}

impl MockRunner {
    /// Every call succeeds with empty output.
    pub fn ok() -> Self {
        Self::new(Vec::new(), Ok(String::new()))
    }

    /// Every call fails with the given error text.
    pub fn failing(message: &str) -> Self {
        Self::new(Vec::new(), Err(message.to_string()))
    }

    /// Scripted responses, consumed in order; afterwards every call
    /// succeeds with empty output.
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        Self::new(responses, Ok(String::new()))
    }

    fn new(responses: Vec<Result<String, String>>, default: Result<String, String>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, script)| script.clone())
            .collect()
    }
}

#[async_trait]
impl ScriptRunner for MockRunner {
    async fn run_script(&self, database: Option<&str>, script: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((database.map(str::to_string), script.to_string()));

        let response = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        response.map_err(|message| anyhow!(message))
    }
}
