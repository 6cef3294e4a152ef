//! Record types stored in the pending-uploads table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Store-assigned record identifier. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A user action waiting for upstream delivery.
///
/// Records are immutable once queued. A correction is a new enqueue plus a
/// removal of the stale record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRecord {
  pub id: RecordId,
  /// Record type tag, e.g. "visit_report". Opaque to the queue.
  pub kind: String,
  pub payload: Value,
  /// Set by the store at insertion
  pub enqueued_at: DateTime<Utc>,
}
