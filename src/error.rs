//! Error taxonomy for the offline layer.

use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OfflineError>;

#[derive(Debug, Clone, Error)]
pub enum OfflineError {
  /// The store cannot be opened or written (quota, read-only, locked).
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// The store exists but its contents or schema cannot be read.
  #[error("storage corrupt: {0}")]
  StorageCorrupt(String),

  /// Transient upload failure; the record stays queued.
  #[error("upload failed: {0}")]
  UploadFailed(String),

  /// One or more shell assets could not be fetched; nothing was activated.
  #[error("cache warm failed, unreachable assets: {}", failed.join(", "))]
  CacheWarmFailed { failed: Vec<String> },

  #[error("network error: {0}")]
  Network(String),
}

impl OfflineError {
  pub fn is_storage(&self) -> bool {
    matches!(
      self,
      OfflineError::StorageUnavailable(_) | OfflineError::StorageCorrupt(_)
    )
  }
}

impl From<rusqlite::Error> for OfflineError {
  fn from(err: rusqlite::Error) -> Self {
    match err.sqlite_error_code() {
      Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
        OfflineError::StorageCorrupt(err.to_string())
      }
      _ => match err {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
          OfflineError::StorageCorrupt(err.to_string())
        }
        other => OfflineError::StorageUnavailable(other.to_string()),
      },
    }
  }
}

impl From<tokio::task::JoinError> for OfflineError {
  fn from(err: tokio::task::JoinError) -> Self {
    OfflineError::StorageUnavailable(format!("storage task did not complete: {}", err))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sqlite_codes_are_classified() {
    let corrupt = rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
      None,
    );
    assert!(matches!(
      OfflineError::from(corrupt),
      OfflineError::StorageCorrupt(_)
    ));

    let full = rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
      None,
    );
    assert!(matches!(
      OfflineError::from(full),
      OfflineError::StorageUnavailable(_)
    ));
  }

  #[test]
  fn test_warm_failure_lists_assets() {
    let err = OfflineError::CacheWarmFailed {
      failed: vec!["/app.js".into(), "/app.css".into()],
    };
    assert_eq!(
      err.to_string(),
      "cache warm failed, unreachable assets: /app.js, /app.css"
    );
    assert!(!err.is_storage());
  }
}
