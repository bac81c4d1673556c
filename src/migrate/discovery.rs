//! Discovery of rigs with un-migrated legacy databases.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::resolver;
use crate::town::{HQ_RIG, LEGACY_DOLT_DIR, Town, is_valid_rig_name};

/// One migratable rig: its name and the legacy database directory to move.
/// Ephemeral: produced by discovery, consumed by the executor, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationCandidate {
    pub rig: String,
    pub source: PathBuf,
}

/// Scan the town for rigs whose legacy embedded database has not been
/// migrated to the shared data root.
///
/// A rig is yielded only when its legacy location holds exactly one
/// candidate database directory and its canonical directory does not exist.
/// Two or more candidates is ambiguous: the rig is skipped with a
/// diagnostic, never guessed at. The scan tolerates concurrent filesystem
/// mutation; a rig whose canonical directory appears mid-scan is excluded.
pub fn find_migratable_databases(town: &Town) -> Result<Vec<MigrationCandidate>> {
    let mut found = Vec::new();

    scan_rig(town, HQ_RIG, &mut found);

    let entries = std::fs::read_dir(town.root())
        .with_context(|| format!("Failed to read town root {}", town.root().display()))?;
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if !is_valid_rig_name(&name) {
            debug!("Skipping non-rig directory '{}'", name);
            continue;
        }
        scan_rig(town, &name, &mut found);
    }

    Ok(found)
}

fn scan_rig(town: &Town, name: &str, found: &mut Vec<MigrationCandidate>) {
    if town.canonical_database_dir(name).exists() {
        return;
    }

    let beads_dir = match resolver::resolve_beads_dir(town, name) {
        Ok(Some(dir)) => dir,
        Ok(None) => return,
        Err(e) => {
            debug!("Cannot resolve beads dir for '{}': {:#}", name, e);
            return;
        }
    };

    let legacy_root = resolver::follow_redirect(&beads_dir);
    let dolt_dir = legacy_root.join(LEGACY_DOLT_DIR);
    if !dolt_dir.is_dir() {
        return;
    }

    let entries = match std::fs::read_dir(&dolt_dir) {
        Ok(entries) => entries,
        Err(e) => {
            // The directory can vanish under us mid-scan; that just means
            // there is nothing left to migrate here.
            debug!("Cannot read {}: {}", dolt_dir.display(), e);
            return;
        }
    };

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        candidates.push(entry.path());
    }

    match candidates.len() {
        0 => {}
        1 => {
            // Re-check just before yielding: a concurrent migration may have
            // finished while we were reading the legacy directory.
            if town.canonical_database_dir(name).exists() {
                debug!("Rig '{}' became migrated mid-scan, excluding", name);
                return;
            }
            found.push(MigrationCandidate {
                rig: name.to_string(),
                source: candidates.remove(0),
            });
        }
        n => {
            warn!(
                "Rig '{}' has {} candidate legacy databases under {}, skipping (refusing to guess)",
                name,
                n,
                dolt_dir.display()
            );
        }
    }
}
