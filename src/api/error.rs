//! Error type shared by the request layer and the query cache.

use std::sync::Arc;

use thiserror::Error;

/// Failure of a single API request or query.
///
/// `Clone` so one in-flight fetch can hand the same error to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// The server answered with a non-success status.
  #[error("{status}: {text}")]
  Status { status: u16, text: String },

  /// The request never produced a response (connect, DNS, timeout...).
  #[error("network error: {0}")]
  Transport(Arc<reqwest::Error>),

  /// The response body was not the JSON we expected.
  #[error("failed to decode response: {0}")]
  Decode(Arc<serde_json::Error>),

  /// The resolved URL could not be turned into an absolute request URL.
  #[error("invalid request URL '{0}'")]
  InvalidUrl(String),

  /// The method name is not a valid HTTP token.
  #[error("invalid HTTP method '{0}'")]
  InvalidMethod(String),

  /// The stored token cannot be sent as a header value.
  #[error("bearer token contains characters not allowed in a header")]
  InvalidToken,

  /// The request payload could not be serialized.
  #[error("failed to encode request body: {0}")]
  Encode(Arc<serde_json::Error>),
}

impl ApiError {
  /// HTTP status of a `Status` error.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    Self::Transport(Arc::new(e))
  }
}
