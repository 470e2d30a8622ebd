use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted note record.
///
/// The store is the exclusive owner of all entries; reads hand out clones,
/// so a snapshot stays stable while the store keeps mutating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Opaque unique identifier. ULID string when generated by the store,
    /// but callers may supply arbitrary ids on upsert.
    pub id: String,

    /// Free-form text body.
    pub content: String,

    /// Optional short label like "home" or "work".
    pub place: Option<String>,

    /// Entry category. Serialized under the field name `type`.
    #[serde(rename = "type")]
    pub kind: MemoryKind,

    /// Immutable after first creation.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every write. Never earlier than `created_at`.
    pub modified_at: DateTime<Utc>,
}

/// Category tag for a memory entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    User,
    System,
    Instructions,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::System => write!(f, "system"),
            Self::Instructions => write!(f, "instructions"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "instructions" => Ok(Self::Instructions),
            _ => anyhow::bail!("Invalid memory kind: '{s}'. Valid: user, system, instructions"),
        }
    }
}
