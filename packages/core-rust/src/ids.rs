//! Identifier generation for exchanges and messages.
//!
//! Generators are injected into whatever creates exchanges; there is no
//! process-wide counter, so independent engines in one process never share
//! sequences.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique identifiers.
pub trait IdGenerator: Send + Sync {
    /// Returns the next identifier. Must never repeat for the lifetime of the generator.
    fn next_id(&self) -> String;
}

/// Random v4 UUID identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Prefixed monotonic sequence, e.g. `ex-1`, `ex-2`, ...
///
/// Cheap and readable; preferred in tests where ids appear in assertions.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequenceIdGenerator {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}
