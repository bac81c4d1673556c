//! Backup snapshots and rollback.
//!
//! A snapshot is a timestamped directory holding, per captured rig, a full
//! copy of its beads directory (hq under the fixed name "hq"). Restoring
//! replays those bytes over current state verbatim; it exists to undo an
//! in-progress or completed migration, so it is destructive on purpose.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::KeeperError;
use crate::migrate::executor::copy_dir_recursive;
use crate::resolver;
use crate::town::{BEADS_DIR, HQ_RIG, Town, is_valid_rig_name};

/// Which rigs a restore touched.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub hq_restored: bool,
}

/// Capture a pre-migration snapshot of every rig that currently has a beads
/// directory. Returns the snapshot path,
/// `<town>/.town/backups/beads-<timestamp>/`.
pub fn create_backup(town: &Town) -> Result<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let backup_dir = town.town_dir().join("backups").join(format!("beads-{stamp}"));
    std::fs::create_dir_all(&backup_dir)
        .with_context(|| format!("Failed to create {}", backup_dir.display()))?;

    let mut captured = 0usize;
    for name in town.known_rigs()? {
        let Ok(Some(beads_dir)) = resolver::resolve_beads_dir(town, &name) else {
            continue;
        };
        if !beads_dir.is_dir() {
            continue;
        }
        copy_dir_recursive(&beads_dir, &backup_dir.join(&name))?;
        captured += 1;
    }

    info!(
        "Captured {} rig(s) into backup {}",
        captured,
        backup_dir.display()
    );
    Ok(backup_dir)
}

/// Replay a backup snapshot over current workspace state.
///
/// An absent or empty backup directory is a successful no-op. A backup path
/// that exists but is not a directory is a named error. Each captured rig's
/// current beads directory is deleted and replaced with the captured bytes.
pub fn restore_from_backup(town: &Town, backup: &Path) -> Result<RestoreReport> {
    let mut report = RestoreReport::default();

    if !backup.exists() {
        info!("No backup at {}, nothing to restore", backup.display());
        return Ok(report);
    }
    if !backup.is_dir() {
        return Err(KeeperError::BackupNotDirectory(backup.to_path_buf()).into());
    }

    let mut names: Vec<String> = std::fs::read_dir(backup)
        .with_context(|| format!("Failed to read backup {}", backup.display()))?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();

    for name in names {
        if !is_valid_rig_name(&name) {
            warn!("Skipping unrecognized backup entry '{}'", name);
            continue;
        }

        let target = resolver::resolve_beads_dir(town, &name)?
            .unwrap_or_else(|| town.rig_dir(&name).join(BEADS_DIR));

        if target.exists() {
            std::fs::remove_dir_all(&target)
                .with_context(|| format!("Failed to clear {}", target.display()))?;
        }
        copy_dir_recursive(&backup.join(&name), &target)?;

        info!("Restored rig '{}' from backup", name);
        if name == HQ_RIG {
            report.hq_restored = true;
        }
        report.restored.push(name);
    }

    Ok(report)
}
