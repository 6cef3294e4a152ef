//! Asset cache that stages, activates and serves shell generations.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::{CacheEntry, SqliteAssetStorage};
use crate::db::Database;
use crate::error::{OfflineError, Result};
use crate::net::{Network, Request, Response};

/// Cache of application-shell responses keyed by request.
///
/// Lookups only see the active generation. `warm` builds a complete new
/// generation before the old one disappears; at most one `warm` runs at a
/// time.
pub struct AssetCache {
  storage: Arc<SqliteAssetStorage>,
  /// Name of the generation this build of the shell expects, e.g. "kali-v1"
  generation_name: String,
  warm_lock: Arc<Mutex<()>>,
}

impl AssetCache {
  /// Create a cache whose generations are named `{name}-v{version}`.
  pub fn new(db: Database, name: &str, version: u32) -> Self {
    Self {
      storage: Arc::new(SqliteAssetStorage::new(db)),
      generation_name: format!("{}-v{}", name, version),
      warm_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn generation_name(&self) -> &str {
    &self.generation_name
  }

  /// Run a storage call off the async worker threads.
  async fn with_storage<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&SqliteAssetStorage) -> Result<T> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    tokio::task::spawn_blocking(move || f(&storage)).await?
  }

  /// Fetch every asset and activate them as a new generation.
  ///
  /// If any asset cannot be fetched, or answers with a non-2xx status,
  /// nothing is written and the previous generation keeps serving.
  pub async fn warm(&self, assets: &[Url], network: &dyn Network) -> Result<String> {
    let _guard = self.warm_lock.lock().await;
    info!(
      generation = %self.generation_name,
      assets = assets.len(),
      "warming asset cache"
    );

    let requests: Vec<Request> = assets.iter().cloned().map(Request::get).collect();
    let results = join_all(requests.iter().map(|request| network.fetch(request))).await;

    let mut entries = Vec::with_capacity(requests.len());
    let mut failed = Vec::new();
    for (request, result) in requests.into_iter().zip(results) {
      match result {
        Ok(response) if response.ok() => {
          let Some(request_key) = request.cache_key() else {
            continue;
          };
          entries.push(CacheEntry {
            request_key,
            url: request.url.to_string(),
            response,
          });
        }
        Ok(response) => {
          warn!(url = %request.url, status = response.status, "shell asset returned an error status");
          failed.push(request.url.to_string());
        }
        Err(err) => {
          warn!(url = %request.url, error = %err, "shell asset unreachable");
          failed.push(request.url.to_string());
        }
      }
    }

    if !failed.is_empty() {
      return Err(OfflineError::CacheWarmFailed { failed });
    }

    let name = self.generation_name.clone();
    let generation = self
      .with_storage(move |storage| storage.install_generation(&name, &entries))
      .await?;
    debug!(id = generation.id, name = %generation.name, "shell generation installed");
    Ok(generation.name)
  }

  /// Cached response for `request` from the active generation.
  ///
  /// Non-GET requests never match.
  pub async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    let Some(request_key) = request.cache_key() else {
      return Ok(None);
    };

    let response = self
      .with_storage(move |storage| storage.lookup(&request_key))
      .await?;
    debug!(url = %request.url, hit = response.is_some(), "cache lookup");
    Ok(response)
  }

  /// Opportunistically add one response to the active generation.
  ///
  /// Non-GET requests are ignored.
  pub async fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let Some(request_key) = request.cache_key() else {
      return Ok(());
    };

    let name = self.generation_name.clone();
    let entry = CacheEntry {
      request_key,
      url: request.url.to_string(),
      response: response.clone(),
    };
    self
      .with_storage(move |storage| storage.put_active(&name, &entry))
      .await
  }

  /// Name of the generation currently answering lookups.
  pub async fn active_generation(&self) -> Result<Option<String>> {
    let generation = self.with_storage(|storage| storage.active_generation()).await?;
    Ok(generation.map(|g| g.name))
  }
}

impl Clone for AssetCache {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation_name: self.generation_name.clone(),
      warm_lock: Arc::clone(&self.warm_lock),
    }
  }
}
