//! reqwest-backed network.

use async_trait::async_trait;
use std::time::Duration;

use super::{Network, Request, Response};
use crate::error::{OfflineError, Result};

/// Network implementation that performs real HTTP requests.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| OfflineError::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| OfflineError::Network(format!("{} {}: {}", request.method, request.url, e)))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|value| (name.as_str().to_string(), value.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| OfflineError::Network(format!("failed to read body of {}: {}", request.url, e)))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_captures_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/src/js/app.js"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("content-type", "application/javascript")
          .set_body_string("console.log('kali')"),
      )
      .mount(&server)
      .await;

    let network = HttpNetwork::new(Duration::from_secs(5)).unwrap();
    let url = Url::parse(&format!("{}/src/js/app.js", server.uri())).unwrap();
    let response = network.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/javascript"));
    assert_eq!(response.body, b"console.log('kali')");
  }

  #[tokio::test]
  async fn test_unreachable_host_is_network_error() {
    let server = MockServer::start().await;
    let url = Url::parse(&format!("{}/", server.uri())).unwrap();
    drop(server);

    let network = HttpNetwork::new(Duration::from_secs(5)).unwrap();
    let err = network.fetch(&Request::navigate(url)).await.unwrap_err();
    assert!(matches!(err, OfflineError::Network(_)));
  }
}
