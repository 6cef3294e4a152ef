//! Background reconciliation of the pending queue.
//!
//! The worker runs on its own task and drains the queue when connectivity
//! comes back or when a sync is requested. It shares nothing with request
//! interception except the database.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::Result;
use crate::queue::{DrainReport, PendingQueue};
use crate::store::RecordStore;
use crate::upload::Uploader;

type Reply = oneshot::Sender<Result<DrainReport>>;

/// Handle to a running sync worker.
pub struct SyncHandle {
  triggers: mpsc::UnboundedSender<Option<Reply>>,
  task: JoinHandle<()>,
}

impl SyncHandle {
  /// Ask for a drain and get its report once it ran.
  ///
  /// Requests that arrive while a drain is running are served together by
  /// one follow-up drain.
  pub fn sync_now(&self) -> oneshot::Receiver<Result<DrainReport>> {
    let (tx, rx) = oneshot::channel();
    // If the worker is gone the reply sender is dropped and the receiver errors
    let _ = self.triggers.send(Some(tx));
    rx
  }

  /// Ask for a drain without waiting for it.
  pub fn request_sync(&self) {
    let _ = self.triggers.send(None);
  }

  /// Stop the worker after any drain in progress finishes.
  pub async fn shutdown(self) {
    let SyncHandle { triggers, task } = self;
    drop(triggers);
    let _ = task.await;
  }
}

/// Spawns the reconciliation task.
pub struct SyncWorker;

impl SyncWorker {
  pub fn spawn<S: RecordStore>(
    queue: PendingQueue<S>,
    uploader: Arc<dyn Uploader>,
    monitor: &ConnectivityMonitor,
  ) -> SyncHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let connectivity = monitor.subscribe();
    let task = tokio::spawn(run(queue, uploader, connectivity, rx));

    SyncHandle { triggers: tx, task }
  }
}

async fn run<S: RecordStore>(
  queue: PendingQueue<S>,
  uploader: Arc<dyn Uploader>,
  mut connectivity: watch::Receiver<Connectivity>,
  mut triggers: mpsc::UnboundedReceiver<Option<Reply>>,
) {
  let mut watching = true;

  loop {
    let mut replies: Vec<Reply> = Vec::new();

    tokio::select! {
      changed = connectivity.changed(), if watching => {
        if changed.is_err() {
          // Monitor dropped; keep serving explicit requests
          watching = false;
          continue;
        }
        let online = connectivity.borrow_and_update().is_online();
        if !online {
          continue;
        }
        info!("connectivity restored, draining pending queue");
      }
      trigger = triggers.recv() => match trigger {
        Some(reply) => replies.extend(reply),
        None => break,
      },
    }

    // Fold requests that are already waiting into this drain
    while let Ok(reply) = triggers.try_recv() {
      replies.extend(reply);
    }

    let result = drain_once(&queue, &uploader).await;
    for reply in replies {
      let _ = reply.send(result.clone());
    }
  }

  info!("sync worker stopped");
}

async fn drain_once<S: RecordStore>(
  queue: &PendingQueue<S>,
  uploader: &Arc<dyn Uploader>,
) -> Result<DrainReport> {
  let result = queue
    .drain(|record| {
      let uploader = Arc::clone(uploader);
      async move { uploader.upload(&record).await }
    })
    .await;

  if let Err(err) = &result {
    error!(error = %err, "drain aborted by storage error");
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::OfflineError;
  use crate::store::{MemoryStore, QueuedRecord};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  /// Fails the first `failures` uploads, then acknowledges everything.
  #[derive(Default)]
  struct FlakyUploader {
    failures: usize,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Uploader for FlakyUploader {
    async fn upload(&self, _record: &QueuedRecord) -> Result<()> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      if call < self.failures {
        Err(OfflineError::UploadFailed("collector unreachable".into()))
      } else {
        Ok(())
      }
    }
  }

  async fn queue_with(records: usize) -> PendingQueue<MemoryStore> {
    let queue = PendingQueue::new(MemoryStore::new());
    for n in 0..records {
      queue
        .enqueue("visit_report", json!({ "n": n }))
        .await
        .unwrap();
    }
    queue
  }

  async fn wait_until_empty(queue: &PendingQueue<MemoryStore>) {
    for _ in 0..200 {
      if queue.pending_count().await.unwrap() == 0 {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue was not drained");
  }

  #[tokio::test]
  async fn test_drains_when_connectivity_returns() {
    let queue = queue_with(2).await;
    let uploader = Arc::new(FlakyUploader::default());
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);

    let handle = SyncWorker::spawn(queue.clone(), uploader.clone(), &monitor);
    monitor.report(Connectivity::Online);

    wait_until_empty(&queue).await;
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_going_offline_does_not_drain() {
    let queue = queue_with(1).await;
    let uploader = Arc::new(FlakyUploader::default());
    let monitor = ConnectivityMonitor::new(Connectivity::Online);

    let handle = SyncWorker::spawn(queue.clone(), uploader.clone(), &monitor);
    monitor.report(Connectivity::Offline);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(queue.pending_count().await.unwrap(), 1);
    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_sync_now_reports_and_retries_failures() {
    let queue = queue_with(1).await;
    let uploader = Arc::new(FlakyUploader {
      failures: 1,
      ..Default::default()
    });
    let monitor = ConnectivityMonitor::new(Connectivity::Online);
    let handle = SyncWorker::spawn(queue.clone(), uploader.clone(), &monitor);

    let first = handle.sync_now().await.unwrap().unwrap();
    assert_eq!(first.failed.len(), 1);
    assert_eq!(queue.pending_count().await.unwrap(), 1);

    let second = handle.sync_now().await.unwrap().unwrap();
    assert_eq!(second.uploaded.len(), 1);
    assert!(second.is_clean());
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_worker_outlives_monitor() {
    let queue = queue_with(1).await;
    let uploader = Arc::new(FlakyUploader::default());
    let handle = {
      let monitor = ConnectivityMonitor::new(Connectivity::Offline);
      SyncWorker::spawn(queue.clone(), uploader.clone(), &monitor)
    };

    let report = handle.sync_now().await.unwrap().unwrap();
    assert_eq!(report.uploaded.len(), 1);
    handle.shutdown().await;
  }
}
