//! Authenticated request function and the cache-facing query fetch.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::auth::{AuthExemption, CredentialStore};
use super::endpoint::resolve_url;
use super::error::ApiError;
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::cache::QueryKey;
use crate::config::ApiConfig;

/// What a read does when the server answers 401.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnauthorizedBehavior {
  /// Resolve to JSON `null`.
  ReturnNull,
  /// Fail like any other non-success status.
  #[default]
  Throw,
}

/// Parse an HTTP method name, ignoring case.
pub fn parse_method(name: &str) -> Result<Method, ApiError> {
  Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
    .map_err(|_| ApiError::InvalidMethod(name.to_string()))
}

fn allows_body(method: &Method) -> bool {
  *method != Method::GET && *method != Method::HEAD
}

/// Client for the portal API.
///
/// Cheap to clone; clones share the transport and the credential store.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  base_url: String,
  credentials: CredentialStore,
  exemption: AuthExemption,
}

impl ApiClient {
  /// Create a client that talks HTTP through reqwest.
  pub fn new(config: &ApiConfig, credentials: CredentialStore) -> Result<Self> {
    let timeout = (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms));
    let transport = ReqwestTransport::new(&config.origin, timeout)?;

    let mut exemption = AuthExemption::default();
    for fragment in &config.auth_exempt {
      exemption = exemption.with_fragment(fragment.clone());
    }

    Ok(
      Self::with_transport(Arc::new(transport), &config.base_url, credentials)
        .with_exemption(exemption),
    )
  }

  /// Create a client over an arbitrary transport.
  pub fn with_transport(
    transport: Arc<dyn Transport>,
    base_url: &str,
    credentials: CredentialStore,
  ) -> Self {
    Self {
      transport,
      base_url: base_url.to_string(),
      credentials,
      exemption: AuthExemption::default(),
    }
  }

  pub fn with_exemption(mut self, exemption: AuthExemption) -> Self {
    self.exemption = exemption;
    self
  }

  pub fn credentials(&self) -> &CredentialStore {
    &self.credentials
  }

  /// Resolve an endpoint against this client's base URL.
  pub fn resolve(&self, endpoint: &str) -> String {
    resolve_url(&self.base_url, endpoint)
  }

  /// Build the request for `method endpoint` without sending it.
  ///
  /// `Content-Type: application/json` and a body are only attached when a
  /// payload is given and the method carries a body. `Authorization` is
  /// only attached when a token is set and the URL is not auth-exempt.
  pub fn build_request(
    &self,
    method: Method,
    endpoint: &str,
    payload: Option<&Value>,
  ) -> Result<HttpRequest, ApiError> {
    let url = self.resolve(endpoint);
    let mut headers = HeaderMap::new();

    let body = match payload {
      Some(payload) if allows_body(&method) => {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Some(serde_json::to_string(payload).map_err(|e| ApiError::Encode(e.into()))?)
      }
      _ => None,
    };

    if let Some(token) = self.exemption.bearer_for(&url, &self.credentials) {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidToken)?;
      headers.insert(AUTHORIZATION, value);
    }

    Ok(HttpRequest {
      method,
      url,
      headers,
      body,
    })
  }

  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
    debug!(
      method = %request.method,
      url = %request.url,
      authorized = request.headers.contains_key(AUTHORIZATION),
      "api request"
    );
    let response = self.transport.send(request).await?;
    debug!(status = response.status, "api response");
    Ok(response)
  }

  /// Perform one request. Any non-success status becomes `ApiError::Status`.
  pub async fn api_request(
    &self,
    method: Method,
    endpoint: &str,
    payload: Option<&Value>,
  ) -> Result<HttpResponse, ApiError> {
    let request = self.build_request(method, endpoint, payload)?;
    self.send(request).await?.error_for_status()
  }

  /// Query fetch function: GET the key's path and parse the JSON body.
  pub async fn fetch_query_json(
    &self,
    key: &QueryKey,
    on_unauthorized: UnauthorizedBehavior,
  ) -> Result<Value, ApiError> {
    let request = self.build_request(Method::GET, &key.path(), None)?;
    let response = self.send(request).await?;

    if response.status == 401 && on_unauthorized == UnauthorizedBehavior::ReturnNull {
      debug!(key = %key, "unauthorized query resolved to null");
      return Ok(Value::Null);
    }

    response.error_for_status()?.json()
  }
}
