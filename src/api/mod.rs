//! Request layer: URL resolution, credentials, and the authenticated request function.

mod auth;
mod client;
mod endpoint;
mod error;
mod transport;

pub use auth::{AuthExemption, CredentialStore};
pub use client::{parse_method, ApiClient, UnauthorizedBehavior};
pub use endpoint::resolve_url;
pub use error::ApiError;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

#[cfg(test)]
pub use transport::mock::MockTransport;
