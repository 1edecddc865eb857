//! Results returned from the query cache.

use chrono::{DateTime, Utc};

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the underlying response was received
  pub fetched_at: DateTime<Utc>,
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// This call issued the network request
  Network,
  /// This call joined a request another caller already had in flight
  Shared,
  /// Served from the cache without touching the network
  Cache,
}
