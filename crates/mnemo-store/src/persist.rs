//! Versioned document codec between the in-memory store and the backing file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mnemo_core::{MemoryEntry, MemoryKind};
use serde::{Deserialize, Serialize};

use crate::migrate::LegacyRecord;

const SCHEMA_VERSION: u64 = 2;

/// A parsed backing file, dispatched by schema version.
#[derive(Debug)]
pub(crate) enum LoadedDocument {
    /// Version 2: canonical entries keyed by id.
    Current(BTreeMap<String, MemoryEntry>),
    /// Version 1: legacy records keyed by title, awaiting migration.
    Legacy(BTreeMap<String, LegacyRecord>),
}

#[derive(Serialize)]
struct DocumentOut<'a> {
    version: u64,
    memories: BTreeMap<&'a str, RecordOut<'a>>,
}

/// Serialized form of one entry. The id lives in the enclosing map key,
/// not in the record.
#[derive(Serialize)]
struct RecordOut<'a> {
    content: &'a str,
    place: Option<&'a str>,
    #[serde(rename = "type")]
    kind: MemoryKind,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct DocumentIn {
    #[serde(default)]
    memories: BTreeMap<String, RecordIn>,
}

/// Record as found in a version 2 document. Timestamps and kind may be
/// absent in files written by older builds.
#[derive(Deserialize)]
struct RecordIn {
    content: String,
    #[serde(default)]
    place: Option<String>,
    #[serde(rename = "type", default)]
    kind: MemoryKind,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    modified_at: Option<DateTime<Utc>>,
}

impl RecordIn {
    fn into_entry(self, id: String, now: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry {
            id,
            content: self.content,
            place: self.place,
            kind: self.kind,
            created_at: self.created_at.unwrap_or(now),
            modified_at: self.modified_at.unwrap_or(now),
        }
    }
}

/// Serialize the entire store into the versioned document and atomically
/// replace the backing file, creating parent directories if missing.
pub(crate) fn write_document(path: &Path, entries: &BTreeMap<String, MemoryEntry>) -> Result<()> {
    let parent = path
        .parent()
        .context("memory file path has no parent directory")?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create memory dir: {}", parent.display()))?;

    let document = DocumentOut {
        version: SCHEMA_VERSION,
        memories: entries
            .iter()
            .map(|(id, entry)| {
                (
                    id.as_str(),
                    RecordOut {
                        content: &entry.content,
                        place: entry.place.as_deref(),
                        kind: entry.kind,
                        created_at: entry.created_at,
                        modified_at: entry.modified_at,
                    },
                )
            })
            .collect(),
    };

    let json =
        serde_json::to_vec_pretty(&document).context("failed to serialize memory document")?;
    atomic_write(path, &json)
}

/// Parse the backing file, dispatching on the schema version.
///
/// `Ok(None)` means there is nothing to load: the file is absent or the
/// document is empty/null. Any parse-level fault is an `Err` the caller is
/// expected to absorb (best-effort load).
pub(crate) fn read_document(path: &Path) -> Result<Option<LoadedDocument>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read memory file: {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse memory file: {}", path.display()))?;

    if value.is_null() || value.as_object().is_some_and(|map| map.is_empty()) {
        return Ok(None);
    }

    // No version field means a pre-versioning legacy document.
    let version = match value.get("version") {
        None => 1,
        Some(field) => field.as_u64().context("memory schema version is not an integer")?,
    };

    match version {
        1 => {
            let legacy: BTreeMap<String, LegacyRecord> = serde_json::from_value(value)
                .context("failed to decode legacy memory document")?;
            Ok(Some(LoadedDocument::Legacy(legacy)))
        }
        2 => {
            let document: DocumentIn = serde_json::from_value(value)
                .context("failed to decode version 2 memory document")?;
            let now = Utc::now();
            let entries = document
                .memories
                .into_iter()
                .map(|(id, record)| {
                    let entry = record.into_entry(id.clone(), now);
                    (id, entry)
                })
                .collect();
            Ok(Some(LoadedDocument::Current(entries)))
        }
        other => anyhow::bail!("unsupported memory schema version {other}"),
    }
}

/// Write data to a file atomically using temp-file + rename.
fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target.parent().context("target path has no parent")?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;

    std::io::Write::write_all(&mut tmp, data).context("failed to write temp memory file")?;

    tmp.persist(target)
        .with_context(|| format!("failed to persist memory file {}", target.display()))?;

    Ok(())
}
