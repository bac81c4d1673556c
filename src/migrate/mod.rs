//! Legacy-to-shared database migration.
//!
//! Discovery scans the town for rigs still carrying an embedded Dolt store;
//! the executor relocates one rig's store into the shared data root. The two
//! halves are deliberately independent: discovery is a read-only observation
//! that may race with in-flight moves (callers wanting exact exclusion hold
//! their own advisory lock), while the executor guarantees the canonical
//! directory only ever appears fully populated.

pub mod discovery;
pub mod executor;

pub use discovery::{MigrationCandidate, find_migratable_databases};
pub use executor::migrate_rig;

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::metadata;
use crate::restore;
use crate::town::Town;

/// Outcome of a town-wide consolidation sweep.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Snapshot captured before anything moved, when there was work to do.
    pub backup: Option<PathBuf>,
    pub migrated: Vec<String>,
    pub errors: Vec<(String, String)>,
}

/// Consolidate every discoverable legacy database into the shared data
/// root: snapshot current state, then per rig migrate, reconcile metadata,
/// and record it in the registry. Per-rig failures are collected rather
/// than aborting the sweep.
pub async fn migrate_all(town: &Town) -> Result<MigrationReport> {
    let candidates = find_migratable_databases(town)?;
    let mut report = MigrationReport::default();

    if candidates.is_empty() {
        info!("No legacy databases to migrate");
        return Ok(report);
    }

    report.backup = Some(restore::create_backup(town)?);

    for candidate in candidates {
        let result = async {
            executor::migrate_rig(town, &candidate.rig, &candidate.source)?;
            metadata::ensure_metadata(town, &candidate.rig).await?;
            town.register_rig(&candidate.rig)
        }
        .await;

        match result {
            Ok(()) => report.migrated.push(candidate.rig),
            Err(e) => {
                warn!("Migration failed for rig '{}': {:#}", candidate.rig, e);
                report.errors.push((candidate.rig, format!("{e:#}")));
            }
        }
    }

    info!(
        "Migration sweep complete: {} migrated, {} failed",
        report.migrated.len(),
        report.errors.len()
    );
    Ok(report)
}
