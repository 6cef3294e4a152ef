//! Request interception with per-class caching strategies.
//!
//! Classification is a pure function of the request and the app origin;
//! the executor then runs the chosen strategy against the asset cache and
//! the network.
//!
//! | Request class                          | Strategy      |
//! |----------------------------------------|---------------|
//! | Non-GET or cross-origin                | Passthrough   |
//! | Navigation or other document load      | Network-first |
//! | Static asset or unknown destination    | Cache-first   |

use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Origin, Url};

use crate::cache::AssetCache;
use crate::error::Result;
use crate::net::{Destination, Network, Request, Response};

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Try the network, fall back to the cache, then to the offline page
  NetworkFirst,
  /// Serve from the cache, fetch and store on a miss
  CacheFirst,
  /// Forward untouched, never cached
  Passthrough,
}

/// Pick the strategy for `request` given the application origin.
pub fn classify(request: &Request, origin: &Origin) -> Strategy {
  if request.method != Method::GET || request.url.origin() != *origin {
    Strategy::Passthrough
  } else if request.is_navigation() {
    Strategy::NetworkFirst
  } else if request.destination.is_static_asset() || request.destination == Destination::Empty {
    Strategy::CacheFirst
  } else {
    // Documents loaded outside a navigation (frames, prefetch)
    Strategy::NetworkFirst
  }
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Cached response served without touching the network
  Cache,
  /// Network failed, cached response served instead
  OfflineFallback,
  /// Network failed and nothing was cached
  OfflinePlaceholder,
  /// Not intercepted
  Passthrough,
}

/// An intercepted response and its source.
#[derive(Debug, Clone)]
pub struct Intercepted {
  pub response: Response,
  pub source: ResponseSource,
}

impl Intercepted {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Serves requests for the application origin from the asset cache and the
/// network.
#[derive(Clone)]
pub struct Interceptor {
  origin: Origin,
  cache: AssetCache,
  network: Arc<dyn Network>,
}

impl Interceptor {
  pub fn new(origin: &Url, cache: AssetCache, network: Arc<dyn Network>) -> Self {
    Self {
      origin: origin.origin(),
      cache,
      network,
    }
  }

  pub fn strategy_for(&self, request: &Request) -> Strategy {
    classify(request, &self.origin)
  }

  /// Serve one request.
  ///
  /// A navigation always resolves to a response, falling back to the
  /// offline placeholder. Cache-first and passthrough requests surface the
  /// network error when there is nothing else to serve.
  pub async fn handle(&self, request: &Request) -> Result<Intercepted> {
    let strategy = self.strategy_for(request);
    debug!(method = %request.method, url = %request.url, ?strategy, "intercepted request");

    match strategy {
      Strategy::NetworkFirst => Ok(self.network_first(request).await),
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::Passthrough => {
        let response = self.network.fetch(request).await?;
        Ok(Intercepted::new(response, ResponseSource::Passthrough))
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Intercepted {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.remember(request, &response).await;
        }
        Intercepted::new(response, ResponseSource::Network)
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "navigation failed, trying cache");
        match self.lookup(request).await {
          Some(cached) => Intercepted::new(cached, ResponseSource::OfflineFallback),
          None => Intercepted::new(
            Response::offline_placeholder(),
            ResponseSource::OfflinePlaceholder,
          ),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Intercepted> {
    if let Some(cached) = self.lookup(request).await {
      return Ok(Intercepted::new(cached, ResponseSource::Cache));
    }

    let response = self.network.fetch(request).await?;
    if response.ok() {
      self.remember(request, &response).await;
    }
    Ok(Intercepted::new(response, ResponseSource::Network))
  }

  /// Cache lookup where a storage failure counts as a miss.
  async fn lookup(&self, request: &Request) -> Option<Response> {
    match self.cache.match_request(request).await {
      Ok(found) => found,
      Err(err) => {
        warn!(url = %request.url, error = %err, "cache lookup failed");
        None
      }
    }
  }

  /// Opportunistic cache write; failures are logged and otherwise ignored.
  async fn remember(&self, request: &Request, response: &Response) {
    if let Err(err) = self.cache.put(request, response).await {
      warn!(url = %request.url, error = %err, "failed to cache response");
    }
  }
}
