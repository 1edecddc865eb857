//! Endpoint to request URL resolution.

/// Returns true when the endpoint already carries an `http://` or `https://` scheme.
pub fn is_absolute(endpoint: &str) -> bool {
  endpoint.starts_with("http://") || endpoint.starts_with("https://")
}

/// Resolve a logical endpoint against the configured base URL.
///
/// - Absolute endpoints pass through unchanged.
/// - With an empty base the endpoint becomes root-relative, so a reverse
///   proxy in front of the API receives `/api/...`.
/// - Otherwise the endpoint is joined to the base with exactly one slash.
pub fn resolve_url(base_url: &str, endpoint: &str) -> String {
  if is_absolute(endpoint) {
    return endpoint.to_string();
  }

  if base_url.is_empty() {
    return if endpoint.starts_with('/') {
      endpoint.to_string()
    } else {
      format!("/{}", endpoint)
    };
  }

  format!(
    "{}/{}",
    base_url.trim_end_matches('/'),
    endpoint.trim_start_matches('/')
  )
}
