//! Request/response model and the network seam used by the interceptor.

mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpNetwork;

use async_trait::async_trait;
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;

/// How the request was issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  NoCors,
}

impl std::str::FromStr for RequestMode {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "navigate" => Ok(RequestMode::Navigate),
      "same-origin" => Ok(RequestMode::SameOrigin),
      "cors" => Ok(RequestMode::Cors),
      "no-cors" => Ok(RequestMode::NoCors),
      other => Err(format!(
        "unknown request mode '{}' (navigate, same-origin, cors, no-cors)",
        other
      )),
    }
  }
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  /// fetch()/XHR or anything not recognised
  #[default]
  Empty,
}

impl Destination {
  /// Guess the destination from the URL path extension.
  pub fn infer(url: &Url) -> Self {
    let path = url.path();
    if path.ends_with('/') {
      return Destination::Document;
    }

    let extension = path
      .rsplit('/')
      .next()
      .and_then(|name| name.rsplit_once('.'))
      .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
      Some("html" | "htm") => Destination::Document,
      Some("js" | "mjs") => Destination::Script,
      Some("css") => Destination::Style,
      Some("png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico") => Destination::Image,
      Some("woff" | "woff2" | "ttf" | "otf") => Destination::Font,
      Some("webmanifest") => Destination::Manifest,
      Some("json") if path.ends_with("manifest.json") => Destination::Manifest,
      _ => Destination::Empty,
    }
  }

  /// Script, style, image, font or manifest.
  pub fn is_static_asset(&self) -> bool {
    matches!(
      self,
      Destination::Script
        | Destination::Style
        | Destination::Image
        | Destination::Font
        | Destination::Manifest
    )
  }
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  /// A same-origin GET with the destination inferred from the path.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      destination: Destination::infer(&url),
      url,
      mode: RequestMode::SameOrigin,
    }
  }

  /// A top-level navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
      destination: Destination::Document,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Stable cache key for this request, or `None` if it is not cacheable.
  ///
  /// Only GET requests have a key. The fragment never reaches the server,
  /// so it is stripped before hashing.
  pub fn cache_key(&self) -> Option<String> {
    if self.method != Method::GET {
      return None;
    }

    let mut url = self.url.clone();
    url.set_fragment(None);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(url.as_str().as_bytes());
    Some(hex::encode(hasher.finalize()))
  }
}

/// A captured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

const OFFLINE_PAGE: &str = "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\n<body><h1>Offline</h1><p>This page is not available offline. Reconnect and try again.</p></body></html>\n";

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  /// Synthetic page served for a navigation that is neither reachable nor
  /// cached.
  pub fn offline_placeholder() -> Self {
    Response::new(503, OFFLINE_PAGE)
      .with_header("content-type", "text/html; charset=utf-8")
      .with_header("cache-control", "no-store")
  }

  /// Status in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

/// Anything that can perform a request.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_destination_inference() {
    assert_eq!(Destination::infer(&url("http://localhost/")), Destination::Document);
    assert_eq!(
      Destination::infer(&url("http://localhost/src/index.html")),
      Destination::Document
    );
    assert_eq!(
      Destination::infer(&url("http://localhost/src/js/app.js")),
      Destination::Script
    );
    assert_eq!(
      Destination::infer(&url("http://localhost/src/css/app.css?v=2")),
      Destination::Style
    );
    assert_eq!(
      Destination::infer(&url("http://localhost/manifest.json")),
      Destination::Manifest
    );
    assert_eq!(
      Destination::infer(&url("http://localhost/api/prices.json")),
      Destination::Empty
    );
    assert_eq!(Destination::infer(&url("http://localhost/api/risk")), Destination::Empty);
    assert!(Destination::Font.is_static_asset());
    assert!(!Destination::Document.is_static_asset());
    assert!(!Destination::Empty.is_static_asset());
  }

  #[test]
  fn test_cache_key_ignores_fragment() {
    let plain = Request::get(url("http://localhost/src/js/app.js"));
    let fragment = Request::get(url("http://localhost/src/js/app.js#main"));
    let query = Request::get(url("http://localhost/src/js/app.js?v=2"));

    assert_eq!(plain.cache_key(), fragment.cache_key());
    assert_ne!(plain.cache_key(), query.cache_key());
    assert_eq!(plain.cache_key().unwrap().len(), 64);
  }

  #[test]
  fn test_only_get_has_cache_key() {
    let post = Request::get(url("http://localhost/api/reports")).with_method(Method::POST);
    assert!(post.cache_key().is_none());
  }

  #[test]
  fn test_request_mode_from_str() {
    assert_eq!("navigate".parse::<RequestMode>().unwrap(), RequestMode::Navigate);
    assert_eq!("no-cors".parse::<RequestMode>().unwrap(), RequestMode::NoCors);
    assert!("Navigate".parse::<RequestMode>().is_err());
  }

  #[test]
  fn test_offline_placeholder() {
    let response = Response::offline_placeholder();
    assert_eq!(response.status, 503);
    assert!(!response.ok());
    assert_eq!(
      response.header("Content-Type"),
      Some("text/html; charset=utf-8")
    );
    assert!(String::from_utf8_lossy(&response.body).contains("Offline"));
  }
}
