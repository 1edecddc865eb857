//! Read and write policies for the query cache.

use std::time::Duration;

use crate::api::UnauthorizedBehavior;

/// Shared policy every query starts from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryDefaults {
  /// `None` keeps cached values until they are invalidated.
  pub stale_time: Option<Duration>,
  /// Automatic retries for a failed read.
  pub retry: u32,
  /// Automatic retries for a failed mutation.
  pub mutation_retry: u32,
  pub refetch_on_window_focus: bool,
  pub on_unauthorized: UnauthorizedBehavior,
}

impl QueryDefaults {
  pub fn query_options(&self) -> QueryOptions {
    QueryOptions {
      stale_time: self.stale_time,
      retry: self.retry,
      refetch_on_window_focus: self.refetch_on_window_focus,
      on_unauthorized: self.on_unauthorized,
    }
  }
}

/// Per-query policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOptions {
  pub stale_time: Option<Duration>,
  pub retry: u32,
  pub refetch_on_window_focus: bool,
  pub on_unauthorized: UnauthorizedBehavior,
}

impl QueryOptions {
  /// Resolve 401 responses to `null` instead of failing.
  pub fn return_null_on_unauthorized(mut self) -> Self {
    self.on_unauthorized = UnauthorizedBehavior::ReturnNull;
    self
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn with_retry(mut self, retry: u32) -> Self {
    self.retry = retry;
    self
  }
}

/// Delay before retry number `attempt` (0-based): doubling from one second, capped at 30.
pub fn retry_delay(attempt: u32) -> Duration {
  let millis = 1000u64.saturating_mul(1u64 << attempt.min(16));
  Duration::from_millis(millis.min(30_000))
}
