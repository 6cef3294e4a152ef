//! SQLite storage for cache generations.

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::info;

use crate::db::Database;
use crate::error::{OfflineError, Result};
use crate::net::Response;

/// A named, versioned snapshot of cached responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  pub id: i64,
  pub name: String,
}

/// One response to be written into a generation.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub request_key: String,
  pub url: String,
  pub response: Response,
}

/// SQLite-based generation storage, backed by the `cache_generations` and
/// `cache_entries` tables.
#[derive(Clone)]
pub struct SqliteAssetStorage {
  db: Database,
}

impl SqliteAssetStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// The generation currently answering lookups.
  pub fn active_generation(&self) -> Result<Option<Generation>> {
    self.db.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT id, name FROM cache_generations WHERE active = 1",
            [],
            |row| {
              Ok(Generation {
                id: row.get(0)?,
                name: row.get(1)?,
              })
            },
          )
          .optional()?,
      )
    })
  }

  /// Every stored generation, active or not.
  #[cfg(test)]
  pub fn generations(&self) -> Result<Vec<Generation>> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT id, name FROM cache_generations ORDER BY id")?;
      let generations = stmt
        .query_map([], |row| {
          Ok(Generation {
            id: row.get(0)?,
            name: row.get(1)?,
          })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(generations)
    })
  }

  /// Find a response in the active generation.
  pub fn lookup(&self, request_key: &str) -> Result<Option<Response>> {
    self.db.with_conn(|conn| {
      let row: Option<(u16, String, Vec<u8>)> = conn
        .query_row(
          "SELECT ce.status, ce.headers, ce.body FROM cache_entries ce
           INNER JOIN cache_generations cg ON cg.id = ce.generation_id
           WHERE cg.active = 1 AND ce.request_key = ?",
          params![request_key],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

      match row {
        Some((status, headers, body)) => {
          let headers: Vec<(String, String)> = serde_json::from_str(&headers).map_err(|e| {
            OfflineError::StorageCorrupt(format!("cached headers are unreadable: {}", e))
          })?;
          Ok(Some(Response {
            status,
            headers,
            body,
          }))
        }
        None => Ok(None),
      }
    })
  }

  /// Write a complete generation and make it the only one.
  ///
  /// Population, activation and deletion of every other generation happen in
  /// one transaction, so readers see either the old generation or the new
  /// one in full.
  pub fn install_generation(&self, name: &str, entries: &[CacheEntry]) -> Result<Generation> {
    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;

      tx.execute(
        "INSERT INTO cache_generations (name, active) VALUES (?, 0)",
        params![name],
      )?;
      let id = tx.last_insert_rowid();

      for entry in entries {
        insert_entry(&tx, id, entry)?;
      }

      let dropped = tx.execute(
        "DELETE FROM cache_generations WHERE id != ?",
        params![id],
      )?;
      tx.execute(
        "DELETE FROM cache_entries WHERE generation_id != ?",
        params![id],
      )?;
      tx.execute(
        "UPDATE cache_generations SET active = 1 WHERE id = ?",
        params![id],
      )?;

      tx.commit()?;

      info!(
        generation = name,
        entries = entries.len(),
        superseded = dropped,
        "activated cache generation"
      );
      Ok(Generation {
        id,
        name: name.to_string(),
      })
    })
  }

  /// Add one entry to the active generation, creating and activating a
  /// generation called `name` if none is active yet.
  pub fn put_active(&self, name: &str, entry: &CacheEntry) -> Result<()> {
    self.db.with_conn(|conn| {
      let tx = conn.transaction()?;

      let active: Option<i64> = tx
        .query_row(
          "SELECT id FROM cache_generations WHERE active = 1",
          [],
          |row| row.get(0),
        )
        .optional()?;

      let id = match active {
        Some(id) => id,
        None => {
          tx.execute(
            "INSERT INTO cache_generations (name, active) VALUES (?, 1)",
            params![name],
          )?;
          tx.last_insert_rowid()
        }
      };

      insert_entry(&tx, id, entry)?;
      tx.commit()?;
      Ok(())
    })
  }
}

fn insert_entry(tx: &Transaction<'_>, generation_id: i64, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.response.headers)
    .map_err(|e| OfflineError::StorageUnavailable(format!("failed to serialize headers: {}", e)))?;

  tx.execute(
    "INSERT OR REPLACE INTO cache_entries (generation_id, request_key, url, status, headers, body)
     VALUES (?, ?, ?, ?, ?, ?)",
    params![
      generation_id,
      entry.request_key,
      entry.url,
      entry.response.status,
      headers,
      entry.response.body
    ],
  )?;
  Ok(())
}
