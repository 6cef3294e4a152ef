pub mod schema;

use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{OfflineError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the offline database.
///
/// Holds the pending-uploads table and the asset cache generations. Cloning
/// is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  ///
  /// Safe to call repeatedly and from several callers at once: the schema
  /// upgrade runs inside an immediate transaction, so concurrent openers
  /// wait for each other instead of racing.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::StorageUnavailable(format!(
          "failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let mut conn = Connection::open(path).map_err(|e| match OfflineError::from(e) {
      OfflineError::StorageUnavailable(msg) => OfflineError::StorageUnavailable(format!(
        "failed to open database at {}: {}",
        path.display(),
        msg
      )),
      other => other,
    })?;

    conn.busy_timeout(BUSY_TIMEOUT)?;
    run_migrations(&mut conn)?;
    debug!(path = %path.display(), "opened offline database");

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Open a private in-memory database. Nothing survives the process.
  pub fn open_in_memory() -> Result<Self> {
    let mut conn = Connection::open_in_memory()?;
    run_migrations(&mut conn)?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        OfflineError::StorageUnavailable("could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("kali-sync").join("offline.db"))
  }

  /// Run `f` with exclusive access to the connection.
  pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| OfflineError::StorageUnavailable(format!("lock poisoned: {}", e)))?;
    f(&mut conn)
  }

  /// Schema version recorded in the file.
  pub fn schema_version(&self) -> Result<i64> {
    self.with_conn(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
  }
}

/// Bring the schema up to [`schema::SCHEMA_VERSION`].
fn run_migrations(conn: &mut Connection) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if version > schema::SCHEMA_VERSION {
    return Err(OfflineError::StorageCorrupt(format!(
      "schema version {} is newer than supported version {}",
      version,
      schema::SCHEMA_VERSION
    )));
  }

  if version < schema::SCHEMA_VERSION {
    for (target, sql) in schema::MIGRATIONS {
      if *target > version {
        tx.execute_batch(sql)?;
      }
    }
    tx.pragma_update(None, "user_version", schema::SCHEMA_VERSION)?;
    info!(
      from = version,
      to = schema::SCHEMA_VERSION,
      "migrated offline database schema"
    );
  }

  tx.commit()?;
  Ok(())
}
