//! Branch-name validation and merge script generation.
//!
//! Branch names arrive from outside and end up interpolated into SQL
//! scripts, so validation is the sole gate against injection: an anchored
//! allow-list, checked before any script text is assembled. The merge flow
//! never bundles a branch delete into the same script as the merge; the
//! delete is a separate execution issued only after the merge is confirmed,
//! so a script failing partway can never have destroyed the branch it was
//! merging.

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

use crate::error::KeeperError;
use crate::retry::run_script_with_retry;
use crate::server::ScriptRunner;

static BRANCH_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap());

/// Allow-list gate for externally supplied branch names.
pub fn validate_branch_name(name: &str) -> Result<(), KeeperError> {
    if !name.is_empty() && BRANCH_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(KeeperError::InvalidBranchName(name.to_string()))
    }
}

/// Merge `source` into `target`. Callers must have validated both names.
pub fn merge_script(target: &str, source: &str) -> String {
    format!("call dolt_checkout('{target}');\ncall dolt_merge('{source}');")
}

/// Delete a branch. Deliberately its own script; see the module docs.
pub fn delete_branch_script(branch: &str) -> String {
    format!("call dolt_branch('-D', '{branch}');")
}

/// Merge `source` into `target` on `database`, then delete the source
/// branch. The delete only runs once the merge has succeeded.
pub async fn merge_branch(
    runner: &dyn ScriptRunner,
    database: &str,
    source: &str,
    target: &str,
) -> Result<()> {
    validate_branch_name(source)?;
    validate_branch_name(target)?;

    run_script_with_retry(runner, Some(database), &merge_script(target, source))
        .await
        .with_context(|| format!("Failed to merge '{source}' into '{target}'"))?;

    info!("Merged '{}' into '{}', deleting source branch", source, target);

    run_script_with_retry(runner, Some(database), &delete_branch_script(source))
        .await
        .with_context(|| format!("Merged but failed to delete branch '{source}'"))?;

    Ok(())
}
