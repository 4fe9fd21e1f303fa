use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Injectable unique-id source. Production ids are UUIDv7 so they sort by
/// creation time; tests substitute a counter.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn new_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

/// Deterministic generator for tests: `id-1`, `id-2`, ...
#[derive(Debug, Default)]
pub struct SequenceIds {
    next: AtomicU64,
}

impl SequenceIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequenceIds {
    fn new_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("id-{n}")
    }
}
