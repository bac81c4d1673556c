//! Storage-error classification and the bounded retry wrapper.
//!
//! Dolt surfaces contention as error text, not error codes, so the
//! classifier is a policy table of phrases: anything matching is worth a
//! bounded retry, everything else fails fast. The tables are deliberately
//! data, not scattered conditionals.

use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::KeeperError;
use crate::health::check_server_reachable;
use crate::server::{ScriptRunner, parse_csv_scalar, parse_flag};
use crate::town::Town;

/// Transient contention conditions, matched case-insensitively against the
/// error text. Ordered roughly by how often they show up in practice.
const RETRYABLE_PHRASES: &[&str] = &[
    "database is read only",
    "read only mode",
    "cannot update manifest",
    "optimistic lock failed",
    "serialization failure",
    "lock wait timeout",
    "try restarting transaction",
];

/// The subset that indicates a stuck read-only server rather than ordinary
/// contention; these route to the dedicated recovery path.
const READ_ONLY_PHRASES: &[&str] = &[
    "database is read only",
    "read only mode",
    "cannot update manifest",
];

pub const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Whether an error is worth retrying. Syntax errors, missing tables,
/// connection failures, and permission problems are all final.
pub fn is_retryable_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Narrower classifier for the stuck read-only condition.
pub fn is_read_only_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    READ_ONLY_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Run a script, retrying transient failures up to [`MAX_ATTEMPTS`] with a
/// short fixed delay. Non-retryable failures return immediately; exhaustion
/// is wrapped in [`KeeperError::RetriesExhausted`].
pub async fn run_script_with_retry(
    runner: &dyn ScriptRunner,
    database: Option<&str>,
    script: &str,
) -> Result<String> {
    let mut last_error = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match runner.run_script(database, script).await {
            Ok(output) => return Ok(output),
            Err(e) => {
                let text = format!("{e:#}");
                if !is_retryable_error(&text) {
                    return Err(e);
                }
                warn!(attempt, "Retryable dolt error: {}", text);
                last_error = Some(e);
                if attempt < MAX_ATTEMPTS {
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    let last = last_error
        .map(|e| format!("{e:#}"))
        .unwrap_or_else(|| "unknown error".to_string());
    Err(KeeperError::RetriesExhausted {
        attempts: MAX_ATTEMPTS,
        last,
    }
    .into())
}

/// Clear a stuck read-only flag on the shared server.
///
/// A town with no reachable server has no stuck state to clear, so that case
/// is a successful no-op. Returns whether a recovery was actually performed.
pub async fn recover_read_only(town: &Town, runner: &dyn ScriptRunner) -> Result<bool> {
    if check_server_reachable(town).await.is_err() {
        debug!("No reachable server, nothing to recover");
        return Ok(false);
    }

    let output = match runner
        .run_script(None, "select @@global.read_only;")
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!("Read-only probe failed, skipping recovery: {:#}", e);
            return Ok(false);
        }
    };

    let read_only = parse_csv_scalar(&output)
        .map(|v| parse_flag(&v))
        .unwrap_or(false);
    if !read_only {
        return Ok(false);
    }

    warn!("Server is read-only, clearing the flag");
    runner
        .run_script(None, "set @@global.read_only = 0;")
        .await?;
    Ok(true)
}
