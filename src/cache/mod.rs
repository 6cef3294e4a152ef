//! Versioned cache of application-shell responses.
//!
//! This module provides:
//! - generation storage where exactly one generation is active at a time
//! - all-or-nothing warming of the shell asset list
//! - opportunistic single-entry caching at runtime
//! - lookups that only ever see the active generation

mod layer;
mod storage;

pub use layer::AssetCache;
