//! In-memory record store.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::record::{QueuedRecord, RecordId};
use super::storage::{DeleteOutcome, RecordStore};
use crate::error::{OfflineError, Result};

/// Storage implementation that keeps records in process memory.
/// Used for `--ephemeral` runs and as a fake store in tests.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  next_id: i64,
  /// Keyed by id; ids grow with insertion so map order is queue order
  records: BTreeMap<RecordId, QueuedRecord>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
    self
      .inner
      .lock()
      .map_err(|e| OfflineError::StorageUnavailable(format!("lock poisoned: {}", e)))
  }
}

impl RecordStore for MemoryStore {
  fn put(&self, kind: &str, payload: &Value) -> Result<QueuedRecord> {
    let mut inner = self.lock()?;
    inner.next_id += 1;

    let now = Utc::now();
    let enqueued_at = match inner.records.values().next_back() {
      Some(last) if last.enqueued_at > now => last.enqueued_at,
      _ => now,
    };

    let record = QueuedRecord {
      id: RecordId(inner.next_id),
      kind: kind.to_string(),
      payload: payload.clone(),
      enqueued_at,
    };
    inner.records.insert(record.id, record.clone());
    Ok(record)
  }

  fn get_all(&self) -> Result<Vec<QueuedRecord>> {
    Ok(self.lock()?.records.values().cloned().collect())
  }

  fn delete(&self, id: RecordId) -> Result<DeleteOutcome> {
    Ok(match self.lock()?.records.remove(&id) {
      Some(_) => DeleteOutcome::Deleted,
      None => DeleteOutcome::NotFound,
    })
  }

  fn count(&self) -> Result<usize> {
    Ok(self.lock()?.records.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_memory_store_matches_contract() {
    let store = MemoryStore::new();
    let a = store.put("visit_report", &json!({"farmer": "Amina"})).unwrap();
    let b = store.put("disease_check", &json!({"crop": "maize"})).unwrap();

    assert!(b.id > a.id);
    assert!(b.enqueued_at >= a.enqueued_at);
    assert_eq!(store.get_all().unwrap(), vec![a.clone(), b.clone()]);

    assert_eq!(store.delete(a.id).unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete(a.id).unwrap(), DeleteOutcome::NotFound);

    let c = store.put("visit_report", &json!({})).unwrap();
    assert!(c.id > b.id);
    assert_eq!(store.count().unwrap(), 2);
  }
}
