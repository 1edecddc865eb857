//! Wire-level request/response types and the transport seam.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::error::ApiError;

/// A fully built outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  /// URL as resolved against the base (may be root-relative).
  pub url: String,
  pub headers: HeaderMap,
  pub body: Option<String>,
}

/// A received response with its body already read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub status_text: String,
  /// Body text, `None` when it could not be read.
  pub body: Option<String>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      status_text: canonical_status_text(status),
      body: Some(body.into()),
    }
  }

  /// A response whose body could not be read.
  pub fn without_body(status: u16) -> Self {
    Self {
      status,
      status_text: canonical_status_text(status),
      body: None,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Body text if non-empty, else the status text.
  pub fn text_or_status(&self) -> String {
    match self.body.as_deref() {
      Some(text) if !text.is_empty() => text.to_string(),
      _ => self.status_text.clone(),
    }
  }

  /// Convert a non-success response into the uniform error shape.
  pub fn error_for_status(self) -> Result<Self, ApiError> {
    if self.is_success() {
      return Ok(self);
    }
    Err(ApiError::Status {
      status: self.status,
      text: self.text_or_status(),
    })
  }

  /// Parse the body as JSON. An empty body parses as `null`.
  pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
    let text = match self.body.as_deref() {
      Some(text) if !text.trim().is_empty() => text,
      _ => "null",
    };
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.into()))
  }
}

fn canonical_status_text(status: u16) -> String {
  StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
    .to_string()
}

/// Sends built requests over some network.
///
/// `ApiClient` only depends on this trait; tests swap in an in-memory
/// implementation.
pub trait Transport: Send + Sync {
  fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>>;
}

/// `reqwest`-backed transport.
///
/// Every request is sent with credentials: the client keeps a cookie store
/// and replays session cookies alongside any bearer header. It also
/// resolves root-relative URLs against `origin` since a native client has
/// no page origin to fall back on.
pub struct ReqwestTransport {
  client: reqwest::Client,
  origin: Url,
}

impl ReqwestTransport {
  pub fn new(origin: &str, timeout: Option<Duration>) -> Result<Self> {
    let origin =
      Url::parse(origin).map_err(|e| eyre!("Invalid API origin '{}': {}", origin, e))?;

    let mut builder = reqwest::Client::builder().cookie_store(true);
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn absolute_url(&self, url: &str) -> Result<Url, ApiError> {
    let parsed = if super::endpoint::is_absolute(url) {
      Url::parse(url)
    } else {
      self.origin.join(url)
    };
    parsed.map_err(|_| ApiError::InvalidUrl(url.to_string()))
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
    Box::pin(async move {
      let url = self.absolute_url(&request.url)?;
      debug!(method = %request.method, %url, "sending request");

      let mut builder = self
        .client
        .request(request.method, url)
        .headers(request.headers);
      if let Some(body) = request.body {
        builder = builder.body(body);
      }

      let response = builder.send().await?;
      let status = response.status();
      let body = response.text().await.ok();

      Ok(HttpResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        body,
      })
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn test_error_prefers_body_text() {
    let err = HttpResponse::new(404, "Not Found").error_for_status().unwrap_err();
    assert_eq!(err.to_string(), "404: Not Found");

    let err = HttpResponse::new(400, "email is required")
      .error_for_status()
      .unwrap_err();
    assert_eq!(err.to_string(), "400: email is required");
  }

  #[test]
  fn test_error_falls_back_to_status_text() {
    let err = HttpResponse::new(500, "").error_for_status().unwrap_err();
    assert_eq!(err.to_string(), "500: Internal Server Error");

    let err = HttpResponse::without_body(401).error_for_status().unwrap_err();
    assert_eq!(err.to_string(), "401: Unauthorized");
  }

  #[test]
  fn test_success_passes_through() {
    let response = HttpResponse::new(204, "").error_for_status().unwrap();
    assert_eq!(response.status, 204);
    assert_eq!(response.json::<serde_json::Value>().unwrap(), serde_json::Value::Null);
  }

  #[tokio::test]
  async fn test_reqwest_transport_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/admin/stats"))
      .and(header("authorization", "Bearer abc123"))
      .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"bookings":3}"#))
      .mount(&server)
      .await;

    let transport = ReqwestTransport::new(&server.uri(), Some(Duration::from_secs(5))).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer abc123".parse().unwrap());

    let response = transport
      .send(HttpRequest {
        method: Method::GET,
        url: "/api/admin/stats".to_string(),
        headers,
        body: None,
      })
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    let json: serde_json::Value = response.json().unwrap();
    assert_eq!(json["bookings"], 3);
  }

  #[tokio::test]
  async fn test_reqwest_transport_replays_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/auth/login"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("set-cookie", "sid=s3cr3t; Path=/")
          .set_body_string("{}"),
      )
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/auth/user"))
      .and(header("cookie", "sid=s3cr3t"))
      .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":1}"#))
      .mount(&server)
      .await;

    let transport = ReqwestTransport::new(&server.uri(), None).unwrap();
    let request = |method: Method, url: &str| HttpRequest {
      method,
      url: url.to_string(),
      headers: HeaderMap::new(),
      body: None,
    };

    transport
      .send(request(Method::POST, "/api/auth/login"))
      .await
      .unwrap();
    let response = transport
      .send(request(Method::GET, "/api/auth/user"))
      .await
      .unwrap();
    assert_eq!(response.status, 200);
  }

  #[tokio::test]
  async fn test_reqwest_transport_reports_status_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/missing"))
      .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
      .mount(&server)
      .await;

    let transport = ReqwestTransport::new(&server.uri(), None).unwrap();
    let response = transport
      .send(HttpRequest {
        method: Method::GET,
        url: format!("{}/api/missing", server.uri()),
        headers: HeaderMap::new(),
        body: None,
      })
      .await
      .unwrap();

    let err = response.error_for_status().unwrap_err();
    assert_eq!(err.to_string(), "404: Not Found");
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    assert!(ReqwestTransport::new("not a url", None).is_err());
  }
}
