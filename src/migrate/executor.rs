//! Relocation of one rig's legacy database into the shared data root.

use anyhow::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::KeeperError;
use crate::town::{LEGACY_DOLT_DIR, Town, validate_rig_name};

/// Move `source` (a rig's legacy database directory) to the canonical
/// location for `name`.
///
/// Refuses to run when the canonical directory already exists: re-invoking
/// after a completed migration is an error, never a silent overwrite. Within
/// one filesystem the move is a single rename; across filesystems the tree
/// is copied into a dot-prefixed staging directory (invisible to discovery)
/// and renamed into place, so a concurrent scan never sees a half-populated
/// canonical directory. A crash after that rename but before the source
/// delete leaves legacy residue behind; discovery then correctly treats the
/// rig as migrated and the doctor reports the leftovers.
pub fn migrate_rig(town: &Town, name: &str, source: &Path) -> Result<PathBuf> {
    validate_rig_name(name)?;

    let dest = town.canonical_database_dir(name);
    if dest.exists() {
        return Err(KeeperError::AlreadyMigrated {
            rig: name.to_string(),
            path: dest,
        }
        .into());
    }
    if !source.exists() {
        return Err(KeeperError::SourceMissing(source.to_path_buf()).into());
    }

    let data_root = town.dolt_data_root();
    std::fs::create_dir_all(&data_root)
        .with_context(|| format!("Failed to create {}", data_root.display()))?;

    match std::fs::rename(source, &dest) {
        Ok(()) => {
            debug!("Renamed {} → {}", source.display(), dest.display());
        }
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            info!(
                "Cross-device migration for rig '{}', copying via staging",
                name
            );
            let staging = data_root.join(format!(".staging-{name}"));
            if staging.exists() {
                // Residue from a crashed earlier attempt.
                std::fs::remove_dir_all(&staging)
                    .with_context(|| format!("Failed to clear {}", staging.display()))?;
            }
            copy_dir_recursive(source, &staging)?;
            std::fs::rename(&staging, &dest).with_context(|| {
                format!("Failed to rename {} → {}", staging.display(), dest.display())
            })?;
            std::fs::remove_dir_all(source)
                .with_context(|| format!("Failed to remove migrated source {}", source.display()))?;
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to move {} → {}", source.display(), dest.display())
            });
        }
    }

    // The emptied legacy dolt/ container is noise once its last database is
    // gone; only remove it when it is in fact empty.
    if let Some(parent) = source.parent() {
        if parent.file_name().and_then(|n| n.to_str()) == Some(LEGACY_DOLT_DIR) {
            let _ = std::fs::remove_dir(parent);
        }
    }

    info!("Migrated rig '{}' to {}", name, dest.display());
    Ok(dest)
}

/// Copy a directory tree, preserving structure and contents.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let entries =
        std::fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", src.display()))?;
        let target = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;

        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} → {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }

    Ok(())
}
