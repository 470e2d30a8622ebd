//! Persistent note-store core.
//!
//! The whole store lives in one versioned JSON document:
//!
//! ```text
//! { "version": 2, "memories": { <id>: {content, place, type, created_at, modified_at} } }
//! ```
//!
//! Every mutation rewrites the full document before returning. Loading a
//! pre-versioning document (entries keyed by title, no `version` field)
//! transparently upgrades the file in place.

mod migrate;
mod persist;
mod store;

pub use mnemo_core::{MemoryEntry, MemoryKind};
pub use store::MemoryStore;
