use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use mnemo_core::{MemoryEntry, MemoryKind};
use tracing::{info, warn};
use ulid::Ulid;

use crate::migrate;
use crate::persist::{self, LoadedDocument};

const MEMORY_FILE_NAME: &str = "memories.json";
const APP_NAME: &str = "mnemo";

/// The authoritative in-memory entry set plus its persistence discipline.
///
/// Every mutation runs inside one critical section covering both the map
/// update and the full-document flush, so concurrent callers cannot lose
/// updates or interleave partial writes to the shared file.
#[derive(Debug)]
pub struct MemoryStore {
    base_dir: PathBuf,
    file_path: PathBuf,
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Create a store rooted at `base_dir`. An empty path selects the
    /// platform default state directory. The store starts empty; call
    /// [`MemoryStore::load`] to populate it from disk.
    pub fn new(base_dir: PathBuf) -> Self {
        let base_dir = if base_dir.as_os_str().is_empty() {
            default_memory_base_dir()
        } else {
            base_dir
        };
        Self {
            file_path: base_dir.join(MEMORY_FILE_NAME),
            base_dir,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a new entry or replace an existing one, then flush the whole
    /// store to disk. Returns the entry id.
    ///
    /// Without an id a fresh ULID is generated. A supplied id that matches
    /// an existing entry keeps that entry's `created_at`; a supplied id
    /// with no match creates a fresh entry under exactly that id.
    ///
    /// On a flush error the in-memory change stays applied and the error
    /// is returned; memory and disk diverge until the next successful
    /// flush.
    pub fn upsert(
        &self,
        content: &str,
        id: Option<&str>,
        place: Option<&str>,
        kind: MemoryKind,
    ) -> Result<String> {
        let mut entries = self.lock_entries();
        let now = Utc::now();

        let (id, created_at) = match id {
            Some(id) => {
                let created_at = entries.get(id).map_or(now, |existing| existing.created_at);
                (id.to_string(), created_at)
            }
            None => (Ulid::new().to_string(), now),
        };

        entries.insert(
            id.clone(),
            MemoryEntry {
                id: id.clone(),
                content: content.to_string(),
                place: place.map(str::to_string),
                kind,
                created_at,
                modified_at: now,
            },
        );

        persist::write_document(&self.file_path, &entries)?;
        Ok(id)
    }

    /// Snapshot of all entries, in id order. The clones are independent of
    /// any later mutation of the store.
    pub fn list(&self) -> Vec<MemoryEntry> {
        self.lock_entries().values().cloned().collect()
    }

    /// Remove an entry by id and flush. Returns `false` without touching
    /// disk when the id is unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.lock_entries();
        if entries.remove(id).is_none() {
            return Ok(false);
        }
        persist::write_document(&self.file_path, &entries)?;
        Ok(true)
    }

    /// Repopulate the store from the backing file.
    ///
    /// Best-effort: an absent file is a no-op, and a malformed document is
    /// logged and skipped with the current entries kept. A version 2
    /// document replaces the in-memory state. A legacy document is
    /// migrated, merged in, and the upgraded document written back; only
    /// that rewrite can surface an error.
    pub fn load(&self) -> Result<()> {
        let mut entries = self.lock_entries();

        let document = match persist::read_document(&self.file_path) {
            Ok(Some(document)) => document,
            Ok(None) => return Ok(()),
            Err(error) => {
                warn!(
                    path = %self.file_path.display(),
                    %error,
                    "failed to load memory file, keeping current entries"
                );
                return Ok(());
            }
        };

        match document {
            LoadedDocument::Current(loaded) => {
                *entries = loaded;
            }
            LoadedDocument::Legacy(legacy) => {
                let migrated = migrate::migrate_legacy(legacy);
                let count = migrated.len();
                entries.extend(migrated);
                persist::write_document(&self.file_path, &entries)
                    .context("failed to persist migrated memory document")?;
                info!(count, "migrated legacy memories to schema version 2");
            }
        }

        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    // A poisoned lock still guards a consistent map: mutations are single
    // inserts/removes, so recovering the inner value is safe.
    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

fn default_memory_base_dir() -> PathBuf {
    if let Some(project_dirs) = directories::ProjectDirs::from("", "", APP_NAME) {
        return project_dirs
            .state_dir()
            .unwrap_or_else(|| project_dirs.data_local_dir())
            .to_path_buf();
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs
            .home_dir()
            .join(".local")
            .join("state")
            .join(APP_NAME);
    }

    std::env::temp_dir().join(format!("{APP_NAME}-state"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn make_test_store() -> (TempDir, MemoryStore) {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path().join("memory"));
        (dir, store)
    }

    #[test]
    fn test_upsert_generates_id_and_timestamps() {
        let (_dir, store) = make_test_store();

        let id = store
            .upsert("remember the garage code", None, None, MemoryKind::User)
            .unwrap();
        assert!(Ulid::from_string(&id).is_ok());

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].created_at, entries[0].modified_at);
    }

    #[test]
    fn test_upsert_existing_preserves_created_at() {
        let (_dir, store) = make_test_store();

        let id = store
            .upsert("v1", None, Some("home"), MemoryKind::User)
            .unwrap();
        let original = store.list().remove(0);

        std::thread::sleep(std::time::Duration::from_millis(10));

        let same_id = store
            .upsert("v2", Some(&id), None, MemoryKind::Instructions)
            .unwrap();
        assert_eq!(same_id, id);

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        let updated = &entries[0];
        assert_eq!(updated.content, "v2");
        assert!(updated.place.is_none());
        assert_eq!(updated.kind, MemoryKind::Instructions);
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.modified_at > original.modified_at);
    }

    #[test]
    fn test_upsert_unknown_id_creates_with_that_id() {
        let (_dir, store) = make_test_store();

        let id = store
            .upsert("note", Some("caller-chosen-id"), None, MemoryKind::User)
            .unwrap();
        assert_eq!(id, "caller-chosen-id");

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "caller-chosen-id");
        assert_eq!(entries[0].created_at, entries[0].modified_at);
    }

    #[test]
    fn test_upsert_accepts_empty_content_and_blank_place() {
        let (_dir, store) = make_test_store();

        store.upsert("", None, Some("   "), MemoryKind::System).unwrap();

        let entries = store.list();
        assert_eq!(entries[0].content, "");
        assert_eq!(entries[0].place.as_deref(), Some("   "));
    }

    #[test]
    fn test_delete_present_and_absent() {
        let (_dir, store) = make_test_store();

        let id = store.upsert("to remove", None, None, MemoryKind::User).unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(store.list().is_empty());

        assert!(!store.delete(&id).unwrap());
        assert!(!store.delete("never-existed").unwrap());
    }

    #[test]
    fn test_delete_absent_does_not_touch_disk() {
        let (_dir, store) = make_test_store();

        assert!(!store.delete("ghost").unwrap());
        assert!(!store.file_path().exists());
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let (_dir, store) = make_test_store();

        store.upsert("one", None, None, MemoryKind::User).unwrap();
        let snapshot = store.list();

        store.upsert("two", None, None, MemoryKind::User).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_a_noop() {
        let (_dir, store) = make_test_store();

        store.load().unwrap();
        assert!(store.list().is_empty());
        assert!(!store.file_path().exists());
    }

    #[test]
    fn test_load_malformed_file_keeps_current_entries() {
        let (_dir, store) = make_test_store();

        let id = store.upsert("survivor", None, None, MemoryKind::User).unwrap();
        std::fs::write(store.file_path(), "{ not json").unwrap();

        store.load().unwrap();

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
    }

    #[test]
    fn test_load_replaces_in_memory_state() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("memory");

        let writer = MemoryStore::new(base.clone());
        writer.upsert("old note", None, None, MemoryKind::User).unwrap();

        // Second handle to the same file rewrites it with a different set.
        let rewriter = MemoryStore::new(base.clone());
        let kept = rewriter
            .upsert("only survivor", None, None, MemoryKind::User)
            .unwrap();

        writer.load().unwrap();
        let entries = writer.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, kept);
    }

    #[test]
    fn test_flush_failure_keeps_in_memory_mutation() {
        let dir = tempdir().unwrap();
        // Parent of the base dir is a plain file, so the flush cannot
        // create the directory.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = MemoryStore::new(blocker.join("memory"));

        let result = store.upsert("unflushable", None, None, MemoryKind::User);
        assert!(result.is_err());

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "unflushable");
    }

    #[test]
    fn test_default_base_dir_resolution() {
        let store = MemoryStore::new(PathBuf::new());
        assert!(!store.base_dir().as_os_str().is_empty());
        assert!(store.file_path().ends_with(MEMORY_FILE_NAME));
    }
}
