//! In-memory query cache with request deduplication and prefix invalidation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::key::QueryKey;
use super::options::{retry_delay, QueryDefaults, QueryOptions};
use super::result::{CacheResult, CacheSource};
use crate::api::{ApiClient, ApiError};

type FetchOutput = Result<(Arc<Value>, DateTime<Utc>), ApiError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutput>>;

/// Last successful response for a key.
#[derive(Clone)]
struct Snapshot {
  value: Arc<Value>,
  fetched_at: DateTime<Utc>,
  refetch_on_focus: bool,
}

enum EntryState {
  Fetching {
    fetch: SharedFetch,
    /// Value being refreshed; restored if the fetch fails.
    previous: Option<Snapshot>,
  },
  Ready {
    snapshot: Snapshot,
    /// Marked by a window-focus notification.
    stale: bool,
  },
}

impl EntryState {
  fn snapshot(&self) -> Option<&Snapshot> {
    match self {
      Self::Fetching { previous, .. } => previous.as_ref(),
      Self::Ready { snapshot, .. } => Some(snapshot),
    }
  }
}

struct Entry {
  state: EntryState,
  /// Identifies the fetch that owns this slot; a fetch only writes back
  /// while its generation still matches.
  generation: u64,
}

#[derive(Default)]
struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  next_generation: AtomicU64,
}

impl Inner {
  fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    // Every critical section leaves the map consistent, so a poisoned lock is still usable.
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Shared query cache.
///
/// Reads go through [`QueryClient::fetch_query`]: a fresh cached value is
/// returned as is, a request already in flight for the same key is joined,
/// and otherwise one GET is issued. Writes go through
/// [`QueryClient::mutate`](super::mutation), which invalidates the keys the
/// mutation declares.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct QueryClient {
  api: ApiClient,
  defaults: QueryDefaults,
  inner: Arc<Inner>,
}

impl QueryClient {
  pub fn new(api: ApiClient, defaults: QueryDefaults) -> Self {
    Self {
      api,
      defaults,
      inner: Arc::default(),
    }
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  pub fn defaults(&self) -> &QueryDefaults {
    &self.defaults
  }

  /// Query options derived from this client's defaults.
  pub fn options(&self) -> QueryOptions {
    self.defaults.query_options()
  }

  /// Read `key` with the default options.
  pub async fn fetch_query<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<T, ApiError> {
    let options = self.options();
    self.fetch_query_with(key, &options).await
  }

  /// Read `key` with explicit options.
  ///
  /// With `ReturnNull` a 401 yields JSON `null`; ask for an `Option<T>` to
  /// receive it as `None`.
  pub async fn fetch_query_with<T: DeserializeOwned>(
    &self,
    key: &QueryKey,
    options: &QueryOptions,
  ) -> Result<T, ApiError> {
    Ok(self.fetch_query_result(key, options).await?.data)
  }

  /// Read `key`, also reporting where the data came from.
  pub async fn fetch_query_result<T: DeserializeOwned>(
    &self,
    key: &QueryKey,
    options: &QueryOptions,
  ) -> Result<CacheResult<T>, ApiError> {
    let (fetch, source) = {
      let mut entries = self.inner.entries();
      match lookup(&entries, key, options) {
        Lookup::Fresh(value, fetched_at) => {
          debug!(%key, "cache hit");
          return decode(&value, CacheSource::Cache, fetched_at);
        }
        Lookup::InFlight(fetch) => {
          debug!(%key, "joining in-flight fetch");
          (fetch, CacheSource::Shared)
        }
        Lookup::Missing => (
          self.start_fetch(&mut entries, key, options),
          CacheSource::Network,
        ),
      }
    };

    let (value, fetched_at) = fetch.await?;
    decode(&value, source, fetched_at)
  }

  /// Fetch `key` again even if the cached value is fresh.
  ///
  /// Joins a fetch that is already in flight rather than starting a second one.
  pub async fn refetch_query<T: DeserializeOwned>(
    &self,
    key: &QueryKey,
    options: &QueryOptions,
  ) -> Result<T, ApiError> {
    let fetch = {
      let mut entries = self.inner.entries();
      match lookup(&entries, key, options) {
        Lookup::InFlight(fetch) => fetch,
        _ => self.start_fetch(&mut entries, key, options),
      }
    };

    let (value, fetched_at) = fetch.await?;
    Ok(decode(&value, CacheSource::Network, fetched_at)?.data)
  }

  /// Register a new fetch for `key` in `entries` and return its shared handle.
  fn start_fetch(
    &self,
    entries: &mut HashMap<QueryKey, Entry>,
    key: &QueryKey,
    options: &QueryOptions,
  ) -> SharedFetch {
    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
    let api = self.api.clone();
    let inner = Arc::downgrade(&self.inner);
    let key_owned = key.clone();
    let options = options.clone();
    let previous = entries
      .get(key)
      .and_then(|e| e.state.snapshot())
      .cloned();

    let fetch = async move {
      let result = fetch_with_retry(&api, &key_owned, &options).await;
      let output = result.map(|value| (Arc::new(value), Utc::now()));
      write_back(&inner, &key_owned, generation, &output, &options);
      output
    }
    .boxed()
    .shared();

    debug!(%key, generation, "starting fetch");
    entries.insert(
      key.clone(),
      Entry {
        state: EntryState::Fetching {
          fetch: fetch.clone(),
          previous,
        },
        generation,
      },
    );
    fetch
  }

  /// Cached value for `key`, without fetching.
  ///
  /// While a refetch is in flight this is still the previous value.
  pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
    let entries = self.inner.entries();
    let snapshot = entries.get(key)?.state.snapshot()?;
    T::deserialize(snapshot.value.as_ref()).ok()
  }

  /// Replace the cached value for `key`, e.g. with a mutation's response.
  ///
  /// An in-flight fetch for the key no longer writes back.
  pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, data: &T) -> Result<(), ApiError> {
    let value = serde_json::to_value(data).map_err(|e| ApiError::Encode(e.into()))?;
    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
    self.inner.entries().insert(
      key.clone(),
      Entry {
        state: EntryState::Ready {
          snapshot: Snapshot {
            value: Arc::new(value),
            fetched_at: Utc::now(),
            refetch_on_focus: self.defaults.refetch_on_window_focus,
          },
          stale: false,
        },
        generation,
      },
    );
    Ok(())
  }

  /// Drop every entry whose key starts with `prefix`; returns how many were removed.
  ///
  /// Fetches in flight for removed keys still resolve for their callers
  /// but do not repopulate the cache.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
    let mut entries = self.inner.entries();
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(prefix));
    let removed = before - entries.len();
    info!(%prefix, removed, "invalidated queries");
    removed
  }

  /// Drop exactly `key`.
  pub fn remove_query(&self, key: &QueryKey) -> bool {
    self.inner.entries().remove(key).is_some()
  }

  /// Drop every entry, e.g. on logout.
  pub fn clear(&self) {
    let mut entries = self.inner.entries();
    let removed = entries.len();
    entries.clear();
    info!(removed, "cleared query cache");
  }

  /// Mark entries whose query opted into refetch-on-focus as stale.
  ///
  /// Under the default policy nothing opts in, so this changes nothing.
  pub fn notify_window_focus(&self) -> usize {
    let mut marked = 0;
    for entry in self.inner.entries().values_mut() {
      if let EntryState::Ready { snapshot, stale } = &mut entry.state {
        if snapshot.refetch_on_focus {
          *stale = true;
          marked += 1;
        }
      }
    }
    marked
  }

  pub fn is_fetching(&self, key: &QueryKey) -> bool {
    matches!(
      self.inner.entries().get(key).map(|e| &e.state),
      Some(EntryState::Fetching { .. })
    )
  }

  /// Keys currently holding a value, sorted by their rendering.
  pub fn cached_keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self
      .inner
      .entries()
      .iter()
      .filter(|(_, e)| e.state.snapshot().is_some())
      .map(|(k, _)| k.clone())
      .collect();
    keys.sort_by_key(|k| k.to_string());
    keys
  }
}

enum Lookup {
  Fresh(Arc<Value>, DateTime<Utc>),
  InFlight(SharedFetch),
  Missing,
}

fn lookup(entries: &HashMap<QueryKey, Entry>, key: &QueryKey, options: &QueryOptions) -> Lookup {
  match entries.get(key).map(|e| &e.state) {
    Some(EntryState::Ready {
      snapshot,
      stale: false,
    }) if is_fresh(snapshot.fetched_at, options) => {
      Lookup::Fresh(Arc::clone(&snapshot.value), snapshot.fetched_at)
    }
    Some(EntryState::Fetching { fetch, .. }) => Lookup::InFlight(fetch.clone()),
    _ => Lookup::Missing,
  }
}

fn is_fresh(fetched_at: DateTime<Utc>, options: &QueryOptions) -> bool {
  match options.stale_time {
    None => true,
    Some(stale_time) => match chrono::Duration::from_std(stale_time) {
      Ok(stale_time) => Utc::now() - fetched_at < stale_time,
      Err(_) => true,
    },
  }
}

fn decode<T: DeserializeOwned>(
  value: &Value,
  source: CacheSource,
  fetched_at: DateTime<Utc>,
) -> Result<CacheResult<T>, ApiError> {
  let data = T::deserialize(value).map_err(|e| ApiError::Decode(e.into()))?;
  Ok(CacheResult {
    data,
    source,
    fetched_at,
  })
}

async fn fetch_with_retry(
  api: &ApiClient,
  key: &QueryKey,
  options: &QueryOptions,
) -> Result<Value, ApiError> {
  let mut attempt = 0;
  loop {
    match api.fetch_query_json(key, options.on_unauthorized).await {
      Ok(value) => return Ok(value),
      Err(e) if attempt < options.retry => {
        let delay = retry_delay(attempt);
        warn!(%key, attempt, error = %e, ?delay, "query failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

/// Store a finished fetch if its slot was not invalidated or replaced meanwhile.
///
/// A failed fetch puts back the value it was refreshing, or leaves no entry.
fn write_back(
  inner: &Weak<Inner>,
  key: &QueryKey,
  generation: u64,
  output: &FetchOutput,
  options: &QueryOptions,
) {
  let Some(inner) = inner.upgrade() else {
    return;
  };
  let mut entries = inner.entries();
  let Some(entry) = entries.get_mut(key).filter(|e| e.generation == generation) else {
    debug!(%key, generation, "discarding result of invalidated fetch");
    return;
  };

  let snapshot = match output {
    Ok((value, fetched_at)) => Some(Snapshot {
      value: Arc::clone(value),
      fetched_at: *fetched_at,
      refetch_on_focus: options.refetch_on_window_focus,
    }),
    Err(_) => match &mut entry.state {
      EntryState::Fetching { previous, .. } => previous.take(),
      EntryState::Ready { .. } => None,
    },
  };

  match snapshot {
    Some(snapshot) => {
      entry.state = EntryState::Ready {
        snapshot,
        stale: false,
      }
    }
    None => {
      debug!(%key, "failed fetch left no value behind");
      entries.remove(key);
    }
  }
}
