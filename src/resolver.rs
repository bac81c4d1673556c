//! Beads-directory resolution.
//!
//! Maps a rig name to its one true metadata directory. Precedence is fixed:
//! the town-level directory for hq, then an existing nested `.beads`, then an
//! existing flat `beads`; when neither exists the nested convention is
//! canonical for creation. Creation relies on `create_dir_all` being
//! idempotent, so concurrent first-callers converge on the identical path.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::town::{BEADS_DIR, BEADS_DIR_FLAT, HQ_RIG, REDIRECT_FILE, Town, validate_rig_name};

/// Read-only lookup. `None` when the rig has no beads directory yet.
pub fn resolve_beads_dir(town: &Town, name: &str) -> Result<Option<PathBuf>> {
    validate_rig_name(name)?;

    if name == HQ_RIG {
        return Ok(Some(town.hq_beads_dir()));
    }

    let rig_dir = town.rig_dir(name);
    let nested = rig_dir.join(BEADS_DIR);
    if nested.is_dir() {
        return Ok(Some(nested));
    }

    let flat = rig_dir.join(BEADS_DIR_FLAT);
    if flat.is_dir() {
        return Ok(Some(flat));
    }

    Ok(None)
}

/// Get-or-create variant. Creation lands on the nested convention; safe for
/// concurrent callers of the same rig name because directory creation is
/// idempotent and all callers compute the identical path.
pub fn ensure_beads_dir(town: &Town, name: &str) -> Result<PathBuf> {
    if let Some(existing) = resolve_beads_dir(town, name)? {
        if existing.is_dir() {
            return Ok(existing);
        }
        // hq path is canonical whether or not it exists yet
        std::fs::create_dir_all(&existing)
            .with_context(|| format!("Failed to create {}", existing.display()))?;
        return Ok(existing);
    }

    let nested = town.rig_dir(name).join(BEADS_DIR);
    std::fs::create_dir_all(&nested)
        .with_context(|| format!("Failed to create {}", nested.display()))?;
    debug!("Created beads directory at {}", nested.display());
    Ok(nested)
}

/// Follow a redirect file if one is present.
///
/// The redirect is a single-line relative path resolved against the
/// directory that contains it. Unreadable or empty redirects leave the
/// directory as-is.
pub fn follow_redirect(dir: &Path) -> PathBuf {
    let redirect = dir.join(REDIRECT_FILE);
    if !redirect.is_file() {
        return dir.to_path_buf();
    }

    match std::fs::read_to_string(&redirect) {
        Ok(contents) => {
            let target = contents.lines().next().unwrap_or("").trim();
            if target.is_empty() {
                debug!("Empty redirect at {}, ignoring", redirect.display());
                dir.to_path_buf()
            } else {
                dir.join(target)
            }
        }
        Err(e) => {
            debug!("Unreadable redirect at {}: {}", redirect.display(), e);
            dir.to_path_buf()
        }
    }
}
