//! Delivery of queued records to the upstream collector.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{OfflineError, Result};
use crate::store::QueuedRecord;

/// Sends one record upstream. `Ok` means the collector acknowledged it.
#[async_trait]
pub trait Uploader: Send + Sync {
  async fn upload(&self, record: &QueuedRecord) -> Result<()>;
}

/// Uploader that POSTs each record as JSON.
pub struct HttpUploader {
  client: reqwest::Client,
  endpoint: Url,
  token: Option<String>,
}

impl HttpUploader {
  pub fn new(endpoint: Url, timeout: Duration, token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| OfflineError::Network(format!("failed to build upload client: {}", e)))?;

    Ok(Self {
      client,
      endpoint,
      token,
    })
  }
}

#[async_trait]
impl Uploader for HttpUploader {
  async fn upload(&self, record: &QueuedRecord) -> Result<()> {
    let mut request = self.client.post(self.endpoint.clone()).json(record);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| OfflineError::UploadFailed(format!("record {}: {}", record.id, e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(OfflineError::UploadFailed(format!(
        "record {}: collector answered {}",
        record.id, status
      )));
    }

    debug!(id = %record.id, %status, "collector acknowledged record");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::RecordId;
  use chrono::Utc;
  use serde_json::json;
  use wiremock::matchers::{body_partial_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn record() -> QueuedRecord {
    QueuedRecord {
      id: RecordId(7),
      kind: "visit_report".to_string(),
      payload: json!({"farmer": "Amina", "crop": "maize"}),
      enqueued_at: Utc::now(),
    }
  }

  fn endpoint(server: &MockServer) -> Url {
    Url::parse(&format!("{}/api/reports", server.uri())).unwrap()
  }

  #[tokio::test]
  async fn test_upload_posts_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/reports"))
      .and(header("authorization", "Bearer field-token"))
      .and(body_partial_json(json!({
        "id": 7,
        "kind": "visit_report",
        "payload": {"farmer": "Amina"}
      })))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let uploader = HttpUploader::new(
      endpoint(&server),
      Duration::from_secs(5),
      Some("field-token".to_string()),
    )
    .unwrap();
    uploader.upload(&record()).await.unwrap();
  }

  #[tokio::test]
  async fn test_rejected_upload_is_upload_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let uploader = HttpUploader::new(endpoint(&server), Duration::from_secs(5), None).unwrap();
    let err = uploader.upload(&record()).await.unwrap_err();
    assert!(matches!(err, OfflineError::UploadFailed(_)));
  }
}
