//! Execution Pipeline Module
//!
//! The bounded worker fleet at the heart of the engine, plus the data model
//! flowing through it.
//!
//! ## Architecture Overview
//! 1. **Submission**: the orchestrator wraps each [`types::WorkItem`] into a
//!    `Commander` carrying its submission index and a reply channel.
//! 2. **Distribution**: a fixed number of workers consume one shared bounded
//!    request channel; whichever worker is idle takes the next request.
//! 3. **Deduplication**: workers consult the per-batch [`dedup::Deduplicator`]
//!    before executing, so identical inputs run at most once per batch.
//! 4. **Results**: workers stamp results with the submission index; ordering
//!    is reassembled by the orchestrator, never by the channel.
//!
//! ## Submodules
//! - **`types`**: `WorkItem`, `ResultRecord`, `Batch`, and the wire-level
//!   timeout/kind encodings.
//! - **`dedup`**: input-fingerprint memoization.
//! - **`pool`**: the worker fleet (`submit` / `stop` / `wait`).

pub mod dedup;
pub mod pool;
pub mod types;
