//! Pending-write queue over the durable record store.
//!
//! The queue is the only writer of the pending-uploads table. A record
//! leaves the queue in exactly two ways: the caller removes it, or `drain`
//! removes it after the upload function acknowledged it.

use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OfflineError, Result};
use crate::store::{DeleteOutcome, QueuedRecord, RecordId, RecordStore};

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// What `drain` does after an upload fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DrainPolicy {
  /// Keep going so one bad record does not block the rest
  #[default]
  #[serde(rename = "continue")]
  ContinuePastFailures,
  /// Stop at the first failure, leaving later records untouched
  #[serde(rename = "stop")]
  StopOnFailure,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
  /// Records acknowledged upstream and removed locally, in upload order
  pub uploaded: Vec<RecordId>,
  /// Records whose upload failed or timed out; still queued
  pub failed: Vec<QueuedRecord>,
  /// Records not attempted because the policy stopped the drain
  pub skipped: usize,
}

impl DrainReport {
  /// True when every queued record was delivered.
  pub fn is_clean(&self) -> bool {
    self.failed.is_empty() && self.skipped == 0
  }
}

/// Ordered queue of records awaiting upstream delivery.
pub struct PendingQueue<S: RecordStore> {
  store: Arc<S>,
  upload_timeout: Duration,
  policy: DrainPolicy,
}

impl<S: RecordStore> PendingQueue<S> {
  /// Create a new queue over the given store.
  pub fn new(store: S) -> Self {
    Self {
      store: Arc::new(store),
      upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
      policy: DrainPolicy::default(),
    }
  }

  /// Set the per-record upload timeout used by `drain`.
  pub fn with_upload_timeout(mut self, upload_timeout: Duration) -> Self {
    self.upload_timeout = upload_timeout;
    self
  }

  /// Set the failure policy used by `drain`.
  pub fn with_policy(mut self, policy: DrainPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Run a store call off the async worker threads.
  async fn with_store<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
  {
    let store = Arc::clone(&self.store);
    tokio::task::spawn_blocking(move || f(&store)).await?
  }

  /// Queue a record. Fails only when the store does.
  pub async fn enqueue(&self, kind: &str, payload: Value) -> Result<RecordId> {
    let kind = kind.to_string();
    let record = self.with_store(move |store| store.put(&kind, &payload)).await?;
    info!(id = %record.id, kind = %record.kind, "queued record");
    Ok(record.id)
  }

  /// Queued records in insertion order.
  pub async fn list(&self) -> Result<Vec<QueuedRecord>> {
    self.with_store(|store| store.get_all()).await
  }

  /// Number of queued records.
  pub async fn pending_count(&self) -> Result<usize> {
    self.with_store(|store| store.count()).await
  }

  /// Remove a record. Removing an id that is already gone is a no-op, which
  /// makes a retry after a crash between acknowledgment and delete safe.
  pub async fn remove(&self, id: RecordId) -> Result<()> {
    match self.with_store(move |store| store.delete(id)).await? {
      DeleteOutcome::Deleted => info!(%id, "removed record"),
      DeleteOutcome::NotFound => debug!(%id, "record already removed"),
    }
    Ok(())
  }

  /// Upload every queued record in order, removing each one only after its
  /// upload succeeded.
  ///
  /// Upload errors and timeouts leave the record queued for the next drain
  /// and are reported in [`DrainReport::failed`]. Storage errors abort the
  /// drain and are returned. Records enqueued after the listing was taken
  /// are left for the next drain.
  pub async fn drain<F, Fut>(&self, mut upload: F) -> Result<DrainReport>
  where
    F: FnMut(QueuedRecord) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let records = self.list().await?;
    let total = records.len();
    let mut report = DrainReport::default();

    for (position, record) in records.into_iter().enumerate() {
      let id = record.id;
      let outcome = match tokio::time::timeout(self.upload_timeout, upload(record.clone())).await {
        Ok(result) => result,
        Err(_) => Err(OfflineError::UploadFailed(format!(
          "timed out after {:?}",
          self.upload_timeout
        ))),
      };

      match outcome {
        Ok(()) => {
          self.remove(id).await?;
          report.uploaded.push(id);
        }
        Err(err) => {
          warn!(%id, kind = %record.kind, error = %err, "upload failed, record stays queued");
          report.failed.push(record);
          if self.policy == DrainPolicy::StopOnFailure {
            report.skipped = total - position - 1;
            break;
          }
        }
      }
    }

    info!(
      uploaded = report.uploaded.len(),
      failed = report.failed.len(),
      skipped = report.skipped,
      "drain finished"
    );
    Ok(report)
  }
}

impl<S: RecordStore> Clone for PendingQueue<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      upload_timeout: self.upload_timeout,
      policy: self.policy,
    }
  }
}
