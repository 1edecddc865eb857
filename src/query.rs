//! Per-view query handle over the shared [`QueryClient`].
//!
//! Inspired by TanStack Query's observers, a `Query<T>` binds one cache key
//! to loading/success/error state that a view can poll from its event loop.
//! The network work and deduplication happen in the shared cache; the handle
//! only tracks what this view has seen.
//!
//! # Example
//!
//! ```ignore
//! let mut stats: Query<AdminStats> = Query::new(queries.clone(), keys::admin_stats());
//!
//! // Start fetching
//! stats.fetch();
//!
//! // In event loop tick
//! if stats.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // After a mutation elsewhere invalidated the key
//! if stats.needs_refetch() {
//!     stats.refetch();
//! }
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::api::ApiError;
use crate::cache::{CacheResult, CacheSource, QueryClient, QueryKey, QueryOptions};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type FetchResult<T> = Result<CacheResult<T>, ApiError>;

/// Observer for one cache key.
pub struct Query<T> {
  client: QueryClient,
  key: QueryKey,
  options: QueryOptions,
  state: QueryState<T>,
  source: Option<CacheSource>,
  receiver: Option<mpsc::UnboundedReceiver<FetchResult<T>>>,
}

impl<T: DeserializeOwned + Send + 'static> Query<T> {
  /// Observe `key` with the client's default options.
  pub fn new(client: QueryClient, key: QueryKey) -> Self {
    let options = client.options();
    Self::with_options(client, key, options)
  }

  pub fn with_options(client: QueryClient, key: QueryKey, options: QueryOptions) -> Self {
    Self {
      client,
      key,
      options,
      state: QueryState::Idle,
      source: None,
      receiver: None,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// Where the last successful result came from.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  /// True when this view shows data the cache has since dropped (invalidated).
  pub fn needs_refetch(&self) -> bool {
    self.state.is_success() && self.client.get_query_data::<Value>(&self.key).is_none()
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    let client = self.client.clone();
    let key = self.key.clone();
    let options = self.options.clone();
    self.spawn(async move { client.fetch_query_result(&key, &options).await });
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Forget any pending result by dropping the receiver
    self.receiver = None;
    let client = self.client.clone();
    let key = self.key.clone();
    let options = self.options.clone();
    self.spawn(async move {
      client
        .refetch_query::<T>(&key, &options)
        .await
        .map(|data| CacheResult {
          data,
          source: CacheSource::Network,
          fetched_at: chrono::Utc::now(),
        })
    });
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(result)) => {
        self.source = Some(result.source);
        self.state = QueryState::Success(result.data);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Task ended without sending; leave the previous state but stop loading.
        self.state = match std::mem::replace(&mut self.state, QueryState::Idle) {
          QueryState::Loading => QueryState::Idle,
          other => other,
        };
        self.receiver = None;
        true
      }
    }
  }

  /// Wait for the pending fetch to finish. Returns `false` if nothing is pending.
  pub async fn settle(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };
    match receiver.recv().await {
      Some(Ok(result)) => {
        self.source = Some(result.source);
        self.state = QueryState::Success(result.data);
      }
      Some(Err(error)) => self.state = QueryState::Error(error),
      None => {
        if self.state.is_loading() {
          self.state = QueryState::Idle;
        }
      }
    }
    self.receiver = None;
    true
  }

  fn spawn<F>(&mut self, future: F)
  where
    F: std::future::Future<Output = FetchResult<T>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the receiver is owned.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("source", &self.source)
      .finish_non_exhaustive()
  }
}
