//! Per-rig metadata reconciliation.
//!
//! Every rig carries a `metadata.json` next to its embedded store. This
//! module owns exactly four keys (`backend`, `dolt_mode`, `dolt_database`,
//! `jsonl_export`) and must leave every other key byte-for-byte alone.
//! A missing, empty, or unparseable document is repaired from scratch, never
//! surfaced as a failure.
//!
//! Writers to the same underlying file serialize through an in-process lock
//! registry keyed by the resolved path; no lock artifact ever touches disk.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::resolver;
use crate::town::{JSONL_EXPORT_FILE, METADATA_FILE, Town};

pub const BACKEND_KEY: &str = "backend";
pub const DOLT_MODE_KEY: &str = "dolt_mode";
pub const DOLT_DATABASE_KEY: &str = "dolt_database";
pub const JSONL_EXPORT_KEY: &str = "jsonl_export";

pub const BACKEND_DOLT: &str = "dolt";
pub const DOLT_MODE_SERVER: &str = "server";

fn metadata_lock_cache() -> &'static StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>> {
    static LOCKS: OnceLock<StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| StdMutex::new(HashMap::new()))
}

fn lock_for(path: &Path) -> Arc<AsyncMutex<()>> {
    let mut cache = metadata_lock_cache()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    cache
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

/// Outcome of reconciling one rig's metadata.
#[derive(Debug, Clone)]
pub struct MetadataReport {
    pub rig: String,
    pub path: PathBuf,
    /// Whether the document had to be created or corrected.
    pub changed: bool,
}

/// Outcome of a town-wide reconciliation sweep.
#[derive(Debug, Clone, Default)]
pub struct EnsureAllReport {
    pub ensured: Vec<String>,
    pub errors: Vec<(String, String)>,
}

/// Reconcile one rig's metadata document with the server-mode backend.
///
/// Idempotent: a second call on an already-correct document changes nothing.
pub async fn ensure_metadata(town: &Town, name: &str) -> Result<MetadataReport> {
    let beads_dir = resolver::ensure_beads_dir(town, name)?;
    let path = beads_dir.join(METADATA_FILE);

    let lock = lock_for(&path);
    let _guard = lock.lock().await;

    let mut doc = read_document(&path);
    let corrected = apply_canonical_fields(&mut doc, name);
    let existed = path.exists();

    if corrected || !existed {
        write_document_atomic(&path, &doc)?;
        if existed {
            info!("Repaired metadata for rig '{}' at {}", name, path.display());
        } else {
            info!("Created metadata for rig '{}' at {}", name, path.display());
        }
    } else {
        debug!("Metadata for rig '{}' already canonical", name);
    }

    Ok(MetadataReport {
        rig: name.to_string(),
        path,
        changed: corrected || !existed,
    })
}

/// Reconcile every known rig, collecting per-rig failures instead of
/// aborting the sweep.
pub async fn ensure_all_metadata(town: &Town) -> Result<EnsureAllReport> {
    let names = town.known_rigs()?;
    let results = futures::future::join_all(
        names.iter().map(|name| ensure_metadata(town, name)),
    )
    .await;

    let mut report = EnsureAllReport::default();
    for (name, result) in names.into_iter().zip(results) {
        match result {
            Ok(_) => report.ensured.push(name),
            Err(e) => {
                warn!("Metadata reconciliation failed for rig '{}': {:#}", name, e);
                report.errors.push((name, format!("{e:#}")));
            }
        }
    }

    Ok(report)
}

/// Read the current document, treating missing/empty/corrupt content as an
/// empty object to repair from.
pub(crate) fn read_document(path: &Path) -> Map<String, Value> {
    if !path.exists() {
        return Map::new();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Unreadable metadata at {}: {}", path.display(), e);
            return Map::new();
        }
    };

    if contents.trim().is_empty() {
        return Map::new();
    }

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                "Metadata at {} is {} rather than an object, repairing",
                path.display(),
                json_type_name(&other)
            );
            Map::new()
        }
        Err(e) => {
            warn!("Corrupt metadata at {}, repairing: {}", path.display(), e);
            Map::new()
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Merge the canonical server-mode fields, returning whether anything had
/// to change. Keys not owned by this module are never touched.
fn apply_canonical_fields(doc: &mut Map<String, Value>, rig: &str) -> bool {
    let mut changed = false;

    let canonical = [
        (BACKEND_KEY, Value::String(BACKEND_DOLT.to_string())),
        (DOLT_MODE_KEY, Value::String(DOLT_MODE_SERVER.to_string())),
        (DOLT_DATABASE_KEY, Value::String(rig.to_string())),
        (JSONL_EXPORT_KEY, Value::String(JSONL_EXPORT_FILE.to_string())),
    ];

    for (key, value) in canonical {
        if doc.get(key) != Some(&value) {
            doc.insert(key.to_string(), value);
            changed = true;
        }
    }

    changed
}

fn write_document_atomic(path: &Path, doc: &Map<String, Value>) -> Result<()> {
    let contents = serde_json::to_string_pretty(doc).context("Failed to serialize metadata")?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, &contents)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {} → {}", temp_path.display(), path.display()))?;

    Ok(())
}
