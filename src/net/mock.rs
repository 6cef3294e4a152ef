//! Scriptable network for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Network, Request, Response};
use crate::error::{OfflineError, Result};

/// Serves canned responses by URL and counts every call.
#[derive(Default)]
pub struct MockNetwork {
  responses: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Make a single URL fail as if its host were down.
  pub fn make_unreachable(&self, url: &str) {
    self.unreachable.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let url = request.url.as_str();
    if self.offline.load(Ordering::SeqCst) || self.unreachable.lock().unwrap().contains(url) {
      return Err(OfflineError::Network(format!("{} is unreachable", url)));
    }

    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .get(url)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}
