//! Detection of rigs whose declared backend disagrees with on-disk reality.
//!
//! A rig that claims the server-mode dolt backend but has no canonical
//! database directory is broken: either its migration never ran (legacy
//! data still exists and a re-migration will fix it) or the data is
//! genuinely gone. The distinction matters for operator triage, so the
//! finding records where surviving legacy data lives, when it does.

use anyhow::Result;
use std::path::PathBuf;
use tracing::warn;

use crate::metadata::{
    BACKEND_DOLT, BACKEND_KEY, DOLT_DATABASE_KEY, DOLT_MODE_KEY, DOLT_MODE_SERVER, read_document,
};
use crate::resolver;
use crate::town::{LEGACY_DOLT_DIR, METADATA_FILE, Town};

/// A computed finding, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenRig {
    pub rig: String,
    /// Database name the rig's metadata declares.
    pub database: String,
    /// Surviving legacy data, when re-migration is still possible.
    pub legacy_data: Option<PathBuf>,
}

/// Cross-check every known rig's declared backend against the shared data
/// root.
pub fn find_broken_rigs(town: &Town) -> Result<Vec<BrokenRig>> {
    let mut broken = Vec::new();

    for name in town.known_rigs()? {
        let beads_dir = match resolver::resolve_beads_dir(town, &name) {
            Ok(Some(dir)) => dir,
            _ => continue,
        };

        let doc = read_document(&beads_dir.join(METADATA_FILE));
        if doc.get(BACKEND_KEY).and_then(|v| v.as_str()) != Some(BACKEND_DOLT) {
            continue;
        }
        if doc.get(DOLT_MODE_KEY).and_then(|v| v.as_str()) != Some(DOLT_MODE_SERVER) {
            continue;
        }

        let database = doc
            .get(DOLT_DATABASE_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(&name)
            .to_string();

        if town.canonical_database_dir(&database).exists() {
            continue;
        }

        let legacy_data = surviving_legacy_data(&beads_dir);
        match &legacy_data {
            Some(path) => warn!(
                "Rig '{}' declares server database '{}' but it is missing; legacy data survives at {}",
                name,
                database,
                path.display()
            ),
            None => warn!(
                "Rig '{}' declares server database '{}' but it is missing and no legacy data survives",
                name, database
            ),
        }

        broken.push(BrokenRig {
            rig: name,
            database,
            legacy_data,
        });
    }

    Ok(broken)
}

/// First legacy database directory still present under the rig's (possibly
/// redirected) beads dir.
fn surviving_legacy_data(beads_dir: &std::path::Path) -> Option<PathBuf> {
    let dolt_dir = resolver::follow_redirect(beads_dir).join(LEGACY_DOLT_DIR);
    let entries = std::fs::read_dir(&dolt_dir).ok()?;
    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .next()
}
