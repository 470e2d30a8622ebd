mod entry;

pub use entry::{MemoryEntry, MemoryKind};
