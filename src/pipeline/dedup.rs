//! Per-Batch Deduplicator
//!
//! Memoizes probe outcomes by input fingerprint so the same input never
//! executes twice within one batch. Later occurrences observe the first
//! outcome. The map lives and dies with its batch.

use super::types::Outcome;

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct Deduplicator {
    seen: RwLock<HashMap<String, Outcome>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Deduplicator::default()
    }

    /// Returns the memoized outcome for an input, if any. Reads run
    /// concurrently across workers.
    pub fn lookup(&self, input: &str) -> Option<Outcome> {
        self.seen
            .read()
            .expect("deduplicator lock poisoned")
            .get(input)
            .cloned()
    }

    /// Records the outcome of a freshly executed input. Last write wins;
    /// the orchestrator guarantees at most one execution per fingerprint, so
    /// in practice each key is written once.
    pub fn record(&self, input: &str, outcome: Outcome) {
        self.seen
            .write()
            .expect("deduplicator lock poisoned")
            .insert(input.to_string(), outcome);
    }

    pub fn len(&self) -> usize {
        self.seen.read().expect("deduplicator lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
