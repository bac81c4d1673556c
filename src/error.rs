//! Named error conditions callers need to distinguish.
//!
//! Most operations return `anyhow::Result`; the variants here are the
//! conditions a caller is expected to match on (via
//! `err.downcast_ref::<KeeperError>()`) rather than just display.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("rig '{rig}' is already migrated: canonical database exists at {}", .path.display())]
    AlreadyMigrated { rig: String, path: PathBuf },

    #[error("migration source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("backup path exists but is not a directory: {}", .0.display())]
    BackupNotDirectory(PathBuf),

    #[error("daemon state file is corrupt at {}: {detail}", .path.display())]
    CorruptDaemonState { path: PathBuf, detail: String },

    #[error("invalid rig name: '{0}'")]
    InvalidRigName(String),

    #[error("invalid branch name: '{0}'")]
    InvalidBranchName(String),

    #[error("dolt server not reachable at {addr}: {detail}")]
    ServerUnreachable { addr: String, detail: String },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}
