//! Bearer credential holder and the auth-endpoint exemption rule.

use std::sync::{Arc, RwLock};

/// Shared holder for the single live bearer token.
///
/// Clones share the same slot: setting the token through one handle is
/// visible to every `ApiClient` built from another.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
  token: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a store that already holds a token (e.g. restored from a session file).
  pub fn with_token(token: impl Into<String>) -> Self {
    let store = Self::new();
    store.set(token);
    store
  }

  pub fn set(&self, token: impl Into<String>) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
  }

  pub fn clear(&self) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
  }

  pub fn get(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn is_set(&self) -> bool {
    self.token.read().unwrap_or_else(|e| e.into_inner()).is_some()
  }
}

/// Decides which URLs never carry an `Authorization` header.
///
/// Login, registration and password-reset endpoints live under `/auth`; they
/// must not receive a stale token.
#[derive(Debug, Clone)]
pub struct AuthExemption {
  fragments: Vec<String>,
}

impl Default for AuthExemption {
  fn default() -> Self {
    Self {
      fragments: vec!["/auth".to_string()],
    }
  }
}

impl AuthExemption {
  /// Exempt no URL at all.
  pub fn none() -> Self {
    Self {
      fragments: Vec::new(),
    }
  }

  /// Add another URL fragment to the exemption list.
  pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
    self.fragments.push(fragment.into());
    self
  }

  /// True when the resolved URL contains any exempt fragment.
  pub fn is_exempt(&self, url: &str) -> bool {
    self.fragments.iter().any(|f| url.contains(f.as_str()))
  }

  /// The token to send for `url`, if any.
  pub fn bearer_for(&self, url: &str, credentials: &CredentialStore) -> Option<String> {
    if self.is_exempt(url) {
      return None;
    }
    credentials.get()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_lifecycle() {
    let store = CredentialStore::new();
    assert!(!store.is_set());

    store.set("abc123");
    assert_eq!(store.get().as_deref(), Some("abc123"));

    store.set("rotated");
    assert_eq!(store.get().as_deref(), Some("rotated"));

    store.clear();
    assert_eq!(store.get(), None);
  }

  #[test]
  fn test_clones_share_token() {
    let store = CredentialStore::new();
    let other = store.clone();
    store.set("shared");
    assert_eq!(other.get().as_deref(), Some("shared"));
    other.clear();
    assert!(!store.is_set());
  }

  #[test]
  fn test_default_exemption_matches_auth_substring() {
    let exemption = AuthExemption::default();
    assert!(exemption.is_exempt("/auth/login"));
    assert!(exemption.is_exempt("/api/auth/register"));
    assert!(exemption.is_exempt("https://api.example.com/auth/reset-password"));
    // Plain substring match, not a path-segment match.
    assert!(exemption.is_exempt("/api/authors"));
    assert!(!exemption.is_exempt("/api/admin/stats"));
    assert!(!exemption.is_exempt("/api/oauth"));
  }

  #[test]
  fn test_bearer_requires_token_and_non_exempt_url() {
    let exemption = AuthExemption::default();
    let store = CredentialStore::new();

    assert_eq!(exemption.bearer_for("/api/admin/stats", &store), None);
    assert_eq!(exemption.bearer_for("/auth/login", &store), None);

    store.set("abc123");
    assert_eq!(
      exemption.bearer_for("/api/admin/stats", &store).as_deref(),
      Some("abc123")
    );
    assert_eq!(exemption.bearer_for("/auth/login", &store), None);
  }

  #[test]
  fn test_extra_fragments() {
    let exemption = AuthExemption::default().with_fragment("/public/");
    assert!(exemption.is_exempt("/public/health"));
    assert!(!AuthExemption::none().is_exempt("/auth/login"));
  }
}
