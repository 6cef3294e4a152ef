//! Durable local store for records created while offline.
//!
//! This module provides:
//! - `QueuedRecord`, the immutable unit of pending work
//! - the `RecordStore` trait with store-assigned ids and timestamps
//! - a SQLite-backed implementation that survives restarts
//! - an in-memory implementation for tests and ephemeral runs

mod memory;
mod record;
mod storage;

pub use memory::MemoryStore;
pub use record::{QueuedRecord, RecordId};
pub use storage::{DeleteOutcome, RecordStore, SqliteStore};
