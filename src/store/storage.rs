//! Record store trait and SQLite implementation.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;
use serde_json::Value;

use super::record::{QueuedRecord, RecordId};
use crate::db::Database;
use crate::error::{OfflineError, Result};

/// Result of a delete. Deleting a missing id is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
  Deleted,
  NotFound,
}

/// Trait for durable record storage backends.
///
/// Every method is atomic on its own: a `put` or `delete` is either fully
/// applied or has no visible effect.
pub trait RecordStore: Send + Sync + 'static {
  /// Insert a record. The store assigns `id` and `enqueued_at`.
  fn put(&self, kind: &str, payload: &Value) -> Result<QueuedRecord>;

  /// All records ordered by `enqueued_at`, then `id`.
  fn get_all(&self) -> Result<Vec<QueuedRecord>>;

  /// Delete a record by id.
  fn delete(&self, id: RecordId) -> Result<DeleteOutcome>;

  /// Number of stored records.
  fn count(&self) -> Result<usize>;
}

/// SQLite-based record storage, backed by the `pending_uploads` table.
#[derive(Clone)]
pub struct SqliteStore {
  db: Database,
}

impl SqliteStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl RecordStore for SqliteStore {
  fn put(&self, kind: &str, payload: &Value) -> Result<QueuedRecord> {
    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;

      // enqueued_at never goes backwards while records are queued
      let latest: Option<i64> =
        tx.query_row("SELECT MAX(enqueued_at) FROM pending_uploads", [], |row| {
          row.get(0)
        })?;
      let now = Utc::now().timestamp_millis();
      let enqueued_at = latest.map_or(now, |latest| latest.max(now));

      tx.execute(
        "INSERT INTO pending_uploads (kind, payload, enqueued_at) VALUES (?, ?, ?)",
        params![kind, payload.to_string(), enqueued_at],
      )?;
      let id = tx.last_insert_rowid();

      tx.commit()?;

      Ok(QueuedRecord {
        id: RecordId(id),
        kind: kind.to_string(),
        payload: payload.clone(),
        enqueued_at: parse_millis(enqueued_at)?,
      })
    })
  }

  fn get_all(&self) -> Result<Vec<QueuedRecord>> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare(
        "SELECT id, kind, payload, enqueued_at FROM pending_uploads
         ORDER BY enqueued_at, id",
      )?;

      let rows = stmt.query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, i64>(3)?,
        ))
      })?;

      let mut records = Vec::new();
      for row in rows {
        let (id, kind, payload, enqueued_at) = row?;
        // A row that cannot be decoded is reported, never dropped
        let payload: Value = serde_json::from_str(&payload).map_err(|e| {
          OfflineError::StorageCorrupt(format!("payload of record {} is unreadable: {}", id, e))
        })?;
        records.push(QueuedRecord {
          id: RecordId(id),
          kind,
          payload,
          enqueued_at: parse_millis(enqueued_at)?,
        });
      }

      Ok(records)
    })
  }

  fn delete(&self, id: RecordId) -> Result<DeleteOutcome> {
    self.db.with_conn(|conn| {
      let deleted = conn.execute("DELETE FROM pending_uploads WHERE id = ?", params![id.0])?;
      Ok(if deleted == 0 {
        DeleteOutcome::NotFound
      } else {
        DeleteOutcome::Deleted
      })
    })
  }

  fn count(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_uploads", [], |row| {
        row.get(0)
      })?;
      Ok(count as usize)
    })
  }
}

/// Convert stored epoch milliseconds to a timestamp.
fn parse_millis(ms: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .ok_or_else(|| OfflineError::StorageCorrupt(format!("invalid enqueued_at value {}", ms)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn memory_store() -> SqliteStore {
    SqliteStore::new(Database::open_in_memory().unwrap())
  }

  #[test]
  fn test_put_assigns_id_and_timestamp() {
    let store = memory_store();
    let record = store
      .put("visit_report", &json!({"farmer": "Amina", "crop": "maize"}))
      .unwrap();

    assert!(record.id.0 > 0);
    assert!(record.enqueued_at.timestamp_millis() > 0);
    assert_eq!(record.kind, "visit_report");
    assert_eq!(store.get_all().unwrap(), vec![record]);
  }

  #[test]
  fn test_get_all_in_insertion_order() {
    let store = memory_store();
    let ids: Vec<RecordId> = (0..5)
      .map(|n| store.put("visit_report", &json!({ "n": n })).unwrap().id)
      .collect();

    let listed: Vec<RecordId> = store.get_all().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(listed, ids);
  }

  #[test]
  fn test_ids_are_never_reused() {
    let store = memory_store();
    let first = store.put("visit_report", &json!({})).unwrap();
    let second = store.put("visit_report", &json!({})).unwrap();
    store.delete(second.id).unwrap();
    store.delete(first.id).unwrap();

    let third = store.put("visit_report", &json!({})).unwrap();
    assert!(third.id > second.id);
  }

  #[test]
  fn test_delete_missing_is_not_found() {
    let store = memory_store();
    let record = store.put("visit_report", &json!({})).unwrap();

    assert_eq!(store.delete(record.id).unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete(record.id).unwrap(), DeleteOutcome::NotFound);
    assert_eq!(store.delete(RecordId(999)).unwrap(), DeleteOutcome::NotFound);
    assert_eq!(store.count().unwrap(), 0);
  }

  #[test]
  fn test_timestamps_do_not_go_backwards() {
    let db = Database::open_in_memory().unwrap();
    let far_future = Utc::now().timestamp_millis() + 60_000;
    db.with_conn(|conn| {
      conn.execute(
        "INSERT INTO pending_uploads (kind, payload, enqueued_at) VALUES ('visit_report', '{}', ?)",
        params![far_future],
      )?;
      Ok(())
    })
    .unwrap();

    let store = SqliteStore::new(db);
    let record = store.put("visit_report", &json!({})).unwrap();
    assert_eq!(record.enqueued_at.timestamp_millis(), far_future);
    assert_eq!(store.get_all().unwrap().last().unwrap().id, record.id);
  }

  #[test]
  fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    let written = {
      let store = SqliteStore::new(Database::open(&path).unwrap());
      store.put("visit_report", &json!({"farmer": "Amina"})).unwrap()
    };

    let store = SqliteStore::new(Database::open(&path).unwrap());
    assert_eq!(store.get_all().unwrap(), vec![written]);
  }

  #[test]
  fn test_unreadable_payload_is_corrupt() {
    let db = Database::open_in_memory().unwrap();
    db.with_conn(|conn| {
      conn.execute(
        "INSERT INTO pending_uploads (kind, payload, enqueued_at) VALUES ('visit_report', 'not json', 1)",
        [],
      )?;
      Ok(())
    })
    .unwrap();

    let err = SqliteStore::new(db).get_all().unwrap_err();
    assert!(matches!(err, OfflineError::StorageCorrupt(_)));
  }
}
