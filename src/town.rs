//! Town layout and rig registry.
//!
//! A town is a directory tree hosting many rig workspaces. The distinguished
//! "hq" rig lives at the town root itself; every other rig lives in a
//! subdirectory named after it. Town-level control state (config, rig
//! registry, daemon state, the shared Dolt data root) lives under
//! `<town>/.town/`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::TownConfig;
use crate::error::KeeperError;

/// The distinguished town-level rig.
pub const HQ_RIG: &str = "hq";

/// Nested (canonical) per-rig metadata directory name.
pub const BEADS_DIR: &str = ".beads";

/// Older flat convention still found in some rigs.
pub const BEADS_DIR_FLAT: &str = "beads";

/// Town control directory.
pub const TOWN_DIR: &str = ".town";

/// Per-rig metadata document inside the beads directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Indirection file pointing at the true beads location.
pub const REDIRECT_FILE: &str = "redirect";

/// Subdirectory of a beads dir holding legacy embedded databases.
pub const LEGACY_DOLT_DIR: &str = "dolt";

/// Fixed JSONL export filename recorded in every rig's metadata.
pub const JSONL_EXPORT_FILE: &str = "issues.jsonl";

/// Handle to one town root.
#[derive(Debug, Clone)]
pub struct Town {
    root: PathBuf,
}

impl Town {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<town>/.town`, the control-plane state directory.
    pub fn town_dir(&self) -> PathBuf {
        self.root.join(TOWN_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.town_dir().join("config.toml")
    }

    pub fn rig_registry_path(&self) -> PathBuf {
        self.town_dir().join("rigs.json")
    }

    pub fn daemon_state_path(&self) -> PathBuf {
        self.town_dir().join("daemon.json")
    }

    /// Shared server-mode data root: one subdirectory per rig name.
    /// Presence of `<data root>/<rig>` is the ground truth for "migrated".
    pub fn dolt_data_root(&self) -> PathBuf {
        self.town_dir().join("dolt")
    }

    pub fn canonical_database_dir(&self, name: &str) -> PathBuf {
        self.dolt_data_root().join(name)
    }

    /// Directory a rig lives in. For hq this is the town root itself.
    pub fn rig_dir(&self, name: &str) -> PathBuf {
        if name == HQ_RIG {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }

    pub fn hq_beads_dir(&self) -> PathBuf {
        self.root.join(BEADS_DIR)
    }

    /// Load the town configuration (defaults + config.toml + env overrides).
    pub fn config(&self) -> Result<TownConfig> {
        TownConfig::load(&self.config_path())
    }

    /// Record a rig in the registry (idempotent; refreshes `last_seen`).
    pub fn register_rig(&self, name: &str) -> Result<()> {
        validate_rig_name(name)?;

        let path = self.rig_registry_path();
        let mut registry = read_registry(&path);
        let now = chrono::Utc::now().timestamp();

        registry
            .rigs
            .entry(name.to_string())
            .and_modify(|entry| entry.last_seen = now)
            .or_insert_with(|| {
                info!("Registered rig '{}' in town registry", name);
                RigEntry {
                    name: name.to_string(),
                    added_at: now,
                    last_seen: now,
                }
            });
        registry.updated_at = now;

        write_registry_atomic(&path, &registry)
    }

    /// Rig names from the registry file only.
    pub fn registered_rigs(&self) -> Vec<String> {
        read_registry(&self.rig_registry_path())
            .rigs
            .keys()
            .cloned()
            .collect()
    }

    /// Every rig the town knows about: the registry, the shared data root,
    /// and hq. Sorted and deduplicated.
    pub fn known_rigs(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.insert(HQ_RIG.to_string());
        names.extend(self.registered_rigs());

        let data_root = self.dolt_data_root();
        if data_root.is_dir() {
            let entries = std::fs::read_dir(&data_root)
                .with_context(|| format!("Failed to read {}", data_root.display()))?;
            for entry in entries.flatten() {
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if is_valid_rig_name(&name) {
                    names.insert(name);
                } else {
                    debug!("Skipping non-rig entry '{}' in data root", name);
                }
            }
        }

        Ok(names.into_iter().collect())
    }
}

/// Rig names are interpolated into paths and must stay boring.
pub fn is_valid_rig_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_rig_name(name: &str) -> Result<(), KeeperError> {
    if is_valid_rig_name(name) {
        Ok(())
    } else {
        Err(KeeperError::InvalidRigName(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Rig registry document
// ---------------------------------------------------------------------------

/// Town-level rig registry (stored at `.town/rigs.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigRegistry {
    pub version: u32,
    pub updated_at: i64,
    pub rigs: BTreeMap<String, RigEntry>,
}

impl Default for RigRegistry {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: 0,
            rigs: BTreeMap::new(),
        }
    }
}

/// Entry for a registered rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigEntry {
    pub name: String,
    pub added_at: i64,
    pub last_seen: i64,
}

/// Read and parse the registry file. Returns default if missing or corrupt.
fn read_registry(path: &Path) -> RigRegistry {
    if !path.exists() {
        return RigRegistry::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Failed to read rig registry {}: {}", path.display(), e);
            return RigRegistry::default();
        }
    };

    // Gracefully handle corrupt JSON — start fresh rather than error
    match serde_json::from_str::<RigRegistry>(&contents) {
        Ok(registry) => registry,
        Err(e) => {
            warn!(
                "Rig registry corrupt ({}), starting fresh: {}",
                path.display(),
                e
            );
            RigRegistry::default()
        }
    }
}

/// Write registry atomically: write to temp file, then rename.
fn write_registry_atomic(path: &Path, registry: &RigRegistry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let contents =
        serde_json::to_string_pretty(registry).context("Failed to serialize rig registry")?;

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, &contents)
        .with_context(|| format!("Failed to write temp registry at {}", temp_path.display()))?;

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} → {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
