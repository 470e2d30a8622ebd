//! One-time upgrade of legacy (version 1) documents, reachable only from
//! the load path.

use std::collections::BTreeMap;

use chrono::Utc;
use mnemo_core::{MemoryEntry, MemoryKind};
use serde::Deserialize;
use ulid::Ulid;

/// Label that marked an entry as system-authored in the legacy schema.
const SYSTEM_NOTES_LABEL: &str = "system-notes";

/// One record of the legacy document, keyed by title on disk.
///
/// Early builds also wrote `relevant_start`/`relevant_end`/`modified_at`;
/// those fields are dropped by the upgrade and simply ignored here.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LegacyRecord {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Transform legacy records into canonical entries.
///
/// Each record gets a fresh id and its title is folded into the content
/// body; the title is not preserved as a separate field. The whole batch
/// shares one timestamp, so entries migrated together are indistinguishable
/// by creation time.
pub(crate) fn migrate_legacy(
    legacy: BTreeMap<String, LegacyRecord>,
) -> BTreeMap<String, MemoryEntry> {
    let now = Utc::now();

    legacy
        .into_values()
        .map(|record| {
            let id = Ulid::new().to_string();
            let kind = if record.labels.iter().any(|label| label == SYSTEM_NOTES_LABEL) {
                MemoryKind::System
            } else {
                MemoryKind::User
            };
            let entry = MemoryEntry {
                id: id.clone(),
                content: format!("{} - {}", record.title, record.content),
                place: record.place,
                kind,
                created_at: now,
                modified_at: now,
            };
            (id, entry)
        })
        .collect()
}
