//! Writes that keep the query cache consistent with server state.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::client::QueryClient;
use super::key::QueryKey;
use super::options::retry_delay;
use crate::api::ApiError;

/// A state-changing request and the cache keys it makes stale.
///
/// Every write must name each key whose displayed data it can affect; a
/// missing key leaves stale data on screen until something else refetches.
#[derive(Debug, Clone)]
pub struct Mutation {
  method: Method,
  endpoint: String,
  payload: Option<Value>,
  invalidates: Vec<QueryKey>,
}

impl Mutation {
  pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
    Self {
      method,
      endpoint: endpoint.into(),
      payload: None,
      invalidates: Vec::new(),
    }
  }

  pub fn post(endpoint: impl Into<String>) -> Self {
    Self::new(Method::POST, endpoint)
  }

  pub fn patch(endpoint: impl Into<String>) -> Self {
    Self::new(Method::PATCH, endpoint)
  }

  pub fn delete(endpoint: impl Into<String>) -> Self {
    Self::new(Method::DELETE, endpoint)
  }

  /// Attach a JSON body.
  pub fn json<P: Serialize>(mut self, payload: &P) -> Result<Self, ApiError> {
    self.payload = Some(serde_json::to_value(payload).map_err(|e| ApiError::Encode(e.into()))?);
    Ok(self)
  }

  /// Invalidate every cached query under `prefix` once the write succeeds.
  pub fn invalidates(mut self, prefix: impl Into<QueryKey>) -> Self {
    self.invalidates.push(prefix.into());
    self
  }

  pub fn invalidated_keys(&self) -> &[QueryKey] {
    &self.invalidates
  }
}

impl QueryClient {
  /// Run a mutation. On success the declared keys are invalidated and the
  /// response body is returned (JSON when it parses, else as a string).
  /// On failure nothing is invalidated.
  pub async fn mutate(&self, mutation: Mutation) -> Result<Value, ApiError> {
    let retries = self.defaults().mutation_retry;
    let mut attempt = 0;

    let response = loop {
      let result = self
        .api()
        .api_request(
          mutation.method.clone(),
          &mutation.endpoint,
          mutation.payload.as_ref(),
        )
        .await;

      match result {
        Ok(response) => break response,
        Err(e) if attempt < retries => {
          let delay = retry_delay(attempt);
          warn!(endpoint = %mutation.endpoint, attempt, error = %e, ?delay, "mutation failed, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    };

    for key in &mutation.invalidates {
      self.invalidate_queries(key);
    }
    info!(
      method = %mutation.method,
      endpoint = %mutation.endpoint,
      invalidated = mutation.invalidates.len(),
      "mutation applied"
    );

    Ok(
      response
        .json()
        .unwrap_or_else(|_| Value::String(response.text_or_status())),
    )
  }
}
