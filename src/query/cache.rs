//! In-memory store of query entries.
//!
//! The store is an explicit object owned by whoever constructs it (normally a
//! [`QueryClient`](super::QueryClient)). Entries are written only by fetch
//! completions and explicit writes (`set_data`, `invalidate`, `cancel`, `abandon`).
//! Snapshots never mutate.
//!
//! Every fetch gets a generation token. A completion is applied only while its
//! generation is still the entry's in-flight one, so results that arrive after
//! a cancel, a direct write or an eviction are dropped. A fetch that was
//! already running when its entry was invalidated still lands, but stays stale.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::key::QueryKey;
use super::state::{FetchKind, QueryResult, QueryStatus};
use crate::error::ApiError;

pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;
pub(crate) type FetchOutcome = Result<AnyData, ApiError>;
pub(crate) type InflightFetch = Shared<BoxFuture<'static, FetchOutcome>>;

const EVENT_CAPACITY: usize = 256;

/// Notification sent whenever an entry changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
  pub key: QueryKey,
  pub status: QueryStatus,
}

struct Inflight {
  generation: u64,
  kind: FetchKind,
  future: InflightFetch,
  /// Invalidated after this fetch started, so its result is already stale
  invalidated: bool,
}

struct CacheEntry {
  status: QueryStatus,
  data: Option<AnyData>,
  error: Option<ApiError>,
  fetched_at: Option<Instant>,
  /// Window used by the most recent fetch request for this key
  stale_time: Duration,
  invalidated: bool,
  inflight: Option<Inflight>,
  /// Generation of the last completion that was written
  applied_generation: u64,
  observers: usize,
}

impl CacheEntry {
  fn new() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      stale_time: Duration::ZERO,
      invalidated: false,
      inflight: None,
      applied_generation: 0,
      observers: 0,
    }
  }

  /// Fresh until strictly more than `stale_time` has passed. A zero window is never fresh.
  fn is_fresh(&self, now: Instant) -> bool {
    if self.status != QueryStatus::Success || self.invalidated || self.stale_time.is_zero() {
      return false;
    }
    self
      .fetched_at
      .map(|at| now.saturating_duration_since(at) <= self.stale_time)
      .unwrap_or(false)
  }
}

/// Decision taken when a consumer asks for a resource.
pub(crate) enum FetchPlan {
  /// Cached data is within its stale window
  Fresh,
  /// A new fetch was registered under `generation`
  Start {
    generation: u64,
    future: InflightFetch,
  },
  /// Another caller's fetch is already running; await it
  Join {
    generation: u64,
    future: InflightFetch,
  },
}

/// Keyed store of query entries plus a change feed for observers.
pub struct QueryCache {
  entries: Mutex<HashMap<QueryKey, CacheEntry>>,
  events: broadcast::Sender<CacheEvent>,
  generations: AtomicU64,
}

impl QueryCache {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      entries: Mutex::new(HashMap::new()),
      events,
      generations: AtomicU64::new(0),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn next_generation(&self) -> u64 {
    self.generations.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn notify(&self, key: &QueryKey, status: QueryStatus) {
    // No receivers is fine
    let _ = self.events.send(CacheEvent {
      key: key.clone(),
      status,
    });
  }

  /// Receive every change to every entry.
  pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  pub fn contains(&self, key: &QueryKey) -> bool {
    self.lock().contains_key(key)
  }

  /// Status of an entry; `Idle` if there is none.
  pub fn status(&self, key: &QueryKey) -> QueryStatus {
    self
      .lock()
      .get(key)
      .map(|entry| entry.status)
      .unwrap_or(QueryStatus::Idle)
  }

  /// Typed snapshot of an entry. Missing entries read as idle.
  pub fn snapshot<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryResult<T> {
    let entries = self.lock();
    let Some(entry) = entries.get(key) else {
      return QueryResult::idle();
    };

    let data = match &entry.data {
      Some(any) => match Arc::clone(any).downcast::<T>() {
        Ok(data) => Some(data),
        Err(_) => {
          warn!(key = %key, "Cached data has a different type than requested");
          None
        }
      },
      None => None,
    };

    QueryResult {
      status: entry.status,
      data,
      error: entry.error.clone(),
      fetched_at: entry.fetched_at,
      fetching: entry.inflight.as_ref().map(|inflight| inflight.kind),
    }
  }

  /// Serve fresh data, join the in-flight fetch, or start `fetch`.
  ///
  /// `fetch` is lazy and is dropped unpolled unless a new fetch is started.
  pub(crate) fn plan_fetch(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    fetch: BoxFuture<'static, FetchOutcome>,
  ) -> FetchPlan {
    let now = Instant::now();
    let (plan, status) = {
      let mut entries = self.lock();
      let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
      entry.stale_time = stale_time;

      if entry.is_fresh(now) {
        return FetchPlan::Fresh;
      }

      if let Some(inflight) = &entry.inflight {
        return FetchPlan::Join {
          generation: inflight.generation,
          future: inflight.future.clone(),
        };
      }

      let generation = self.next_generation();
      let future = fetch.shared();
      entry.inflight = Some(Inflight {
        generation,
        kind: FetchKind::Initial,
        future: future.clone(),
        invalidated: false,
      });
      if entry.data.is_none() {
        entry.status = QueryStatus::Loading;
      }

      (FetchPlan::Start { generation, future }, entry.status)
    };

    debug!(key = %key, "Fetch started");
    self.notify(key, status);
    plan
  }

  /// Start a next-page fetch built from the current data.
  ///
  /// Returns `None` (and does nothing) when the entry has no data, a fetch is
  /// already outstanding, or `build` finds no next page. A caller that stops
  /// awaiting the returned fetch must [`abandon`](Self::abandon) it.
  pub(crate) fn plan_next_page<F>(&self, key: &QueryKey, build: F) -> Option<(u64, InflightFetch)>
  where
    F: FnOnce(&AnyData) -> Option<BoxFuture<'static, FetchOutcome>>,
  {
    let (generation, future, status) = {
      let mut entries = self.lock();
      let entry = entries.get_mut(key)?;

      if entry.inflight.is_some() {
        debug!(key = %key, "Next page skipped, fetch already in flight");
        return None;
      }

      let fetch = build(entry.data.as_ref()?)?;
      let generation = self.next_generation();
      let future = fetch.shared();
      entry.inflight = Some(Inflight {
        generation,
        kind: FetchKind::NextPage,
        future: future.clone(),
        invalidated: false,
      });

      (generation, future, entry.status)
    };

    debug!(key = %key, "Next page fetch started");
    self.notify(key, status);
    Some((generation, future))
  }

  /// Record the outcome of fetch `generation`.
  ///
  /// Every caller awaiting a shared fetch reports it; only the first report
  /// for the current generation is written.
  pub(crate) fn complete(&self, key: &QueryKey, generation: u64, outcome: FetchOutcome) {
    let status = {
      let mut entries = self.lock();
      let Some(entry) = entries.get_mut(key) else {
        debug!(key = %key, "Completion for evicted entry discarded");
        return;
      };

      let invalidated = match &entry.inflight {
        Some(inflight) if inflight.generation == generation => inflight.invalidated,
        _ => {
          if entry.applied_generation != generation {
            debug!(key = %key, generation, "Stale completion discarded");
          }
          return;
        }
      };

      entry.inflight = None;
      entry.applied_generation = generation;

      match outcome {
        Ok(data) => {
          entry.data = Some(data);
          entry.error = None;
          entry.status = QueryStatus::Success;
          entry.fetched_at = Some(Instant::now());
          entry.invalidated = invalidated;
        }
        Err(err) => {
          warn!(key = %key, error = %err, "Fetch failed");
          entry.error = Some(err);
          entry.status = QueryStatus::Error;
        }
      }

      entry.status
    };

    self.notify(key, status);
  }

  /// Forget fetch `generation` because nobody is waiting for it any more.
  ///
  /// Its result will be discarded and the key can start a new fetch.
  pub(crate) fn abandon(&self, key: &QueryKey, generation: u64) {
    let status = {
      let mut entries = self.lock();
      let Some(entry) = entries.get_mut(key) else {
        return;
      };
      if !matches!(&entry.inflight, Some(inflight) if inflight.generation == generation) {
        return;
      }
      entry.inflight = None;
      if entry.status == QueryStatus::Loading {
        entry.status = QueryStatus::Idle;
      }
      entry.status
    };

    debug!(key = %key, generation, "Fetch abandoned");
    self.notify(key, status);
  }

  /// Write data directly, as if a fetch had just succeeded.
  ///
  /// A fetch already in flight for the key predates the write and is discarded.
  pub(crate) fn set_data(&self, key: &QueryKey, data: AnyData) {
    {
      let mut entries = self.lock();
      let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
      if entry.inflight.take().is_some() {
        debug!(key = %key, "In-flight fetch superseded by direct write");
      }
      entry.data = Some(data);
      entry.error = None;
      entry.status = QueryStatus::Success;
      entry.fetched_at = Some(Instant::now());
      entry.invalidated = false;
    }
    self.notify(key, QueryStatus::Success);
  }

  /// Mark every entry under `prefix` stale. Returns how many were marked.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let touched: Vec<(QueryKey, QueryStatus)> = {
      let mut entries = self.lock();
      entries
        .iter_mut()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, entry)| {
          entry.invalidated = true;
          if let Some(inflight) = entry.inflight.as_mut() {
            inflight.invalidated = true;
          }
          (key.clone(), entry.status)
        })
        .collect()
    };

    debug!(prefix = %prefix, count = touched.len(), "Invalidated queries");
    for (key, status) in &touched {
      self.notify(key, *status);
    }
    touched.len()
  }

  /// Drop in-flight fetches under `prefix`. Their results will be discarded.
  pub fn cancel(&self, prefix: &QueryKey) -> usize {
    let cancelled: Vec<(QueryKey, QueryStatus)> = {
      let mut entries = self.lock();
      entries
        .iter_mut()
        .filter(|(key, entry)| key.starts_with(prefix) && entry.inflight.is_some())
        .map(|(key, entry)| {
          entry.inflight = None;
          if entry.status == QueryStatus::Loading {
            entry.status = QueryStatus::Idle;
          }
          (key.clone(), entry.status)
        })
        .collect()
    };

    for (key, status) in &cancelled {
      debug!(key = %key, "Fetch cancelled");
      self.notify(key, *status);
    }
    cancelled.len()
  }

  pub fn remove(&self, key: &QueryKey) -> bool {
    self.lock().remove(key).is_some()
  }

  /// Evict entries nobody observes and nothing is fetching. Returns how many went.
  pub fn gc(&self) -> usize {
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|_, entry| entry.observers > 0 || entry.inflight.is_some());
    let evicted = before - entries.len();
    if evicted > 0 {
      debug!(evicted, "Cache gc");
    }
    evicted
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub(crate) fn add_observer(&self, key: &QueryKey) {
    let mut entries = self.lock();
    let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
    entry.observers += 1;
  }

  pub(crate) fn remove_observer(&self, key: &QueryKey) {
    if let Some(entry) = self.lock().get_mut(key) {
      entry.observers = entry.observers.saturating_sub(1);
    }
  }

  pub fn observer_count(&self, key: &QueryKey) -> usize {
    self
      .lock()
      .get(key)
      .map(|entry| entry.observers)
      .unwrap_or(0)
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ready(value: u32) -> BoxFuture<'static, FetchOutcome> {
    async move { Ok(Arc::new(value) as AnyData) }.boxed()
  }

  fn key(id: &str) -> QueryKey {
    QueryKey::new(["topics", "detail", id])
  }

  async fn run(cache: &QueryCache, key: &QueryKey, stale: Duration, value: u32) {
    if let FetchPlan::Start { generation, future } = cache.plan_fetch(key, stale, ready(value)) {
      let outcome = future.await;
      cache.complete(key, generation, outcome);
    }
  }

  fn start(cache: &QueryCache, key: &QueryKey, stale: Duration, value: u32) -> (u64, InflightFetch) {
    match cache.plan_fetch(key, stale, ready(value)) {
      FetchPlan::Start { generation, future } => (generation, future),
      _ => panic!("expected a fetch to start"),
    }
  }

  #[tokio::test]
  async fn test_fresh_entry_is_not_refetched() {
    let cache = QueryCache::new();
    let k = key("1");
    run(&cache, &k, Duration::from_secs(30), 7).await;

    assert!(matches!(
      cache.plan_fetch(&k, Duration::from_secs(30), ready(8)),
      FetchPlan::Fresh
    ));
    assert_eq!(cache.snapshot::<u32>(&k).data(), Some(&7));
  }

  #[tokio::test]
  async fn test_cancelled_fetch_result_is_discarded() {
    let cache = QueryCache::new();
    let k = key("1");

    let (generation, future) = start(&cache, &k, Duration::from_secs(30), 1);
    assert_eq!(cache.status(&k), QueryStatus::Loading);

    assert_eq!(cache.cancel(&QueryKey::new(["topics"])), 1);
    assert_eq!(cache.status(&k), QueryStatus::Idle);

    let outcome = future.await;
    cache.complete(&k, generation, outcome);

    let snapshot = cache.snapshot::<u32>(&k);
    assert!(snapshot.is_idle());
    assert_eq!(snapshot.data(), None);
  }

  #[tokio::test]
  async fn test_invalidate_only_touches_prefix() {
    let cache = QueryCache::new();
    let stale = Duration::from_secs(300);
    let posts = key("1").with("posts");
    let other = QueryKey::new(["forums", "list"]);
    run(&cache, &posts, stale, 1).await;
    run(&cache, &other, stale, 2).await;

    assert_eq!(cache.invalidate(&key("1")), 1);
    assert!(matches!(
      cache.plan_fetch(&posts, stale, ready(3)),
      FetchPlan::Start { .. }
    ));
    assert!(matches!(
      cache.plan_fetch(&other, stale, ready(4)),
      FetchPlan::Fresh
    ));
  }

  #[tokio::test]
  async fn test_gc_keeps_observed_entries() {
    let cache = QueryCache::new();
    let stale = Duration::from_secs(30);
    run(&cache, &key("1"), stale, 1).await;
    run(&cache, &key("2"), stale, 2).await;
    cache.add_observer(&key("2"));

    assert_eq!(cache.gc(), 1);
    assert!(!cache.contains(&key("1")));
    assert!(cache.contains(&key("2")));

    cache.remove_observer(&key("2"));
    assert_eq!(cache.gc(), 1);
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_events_are_published() {
    let cache = QueryCache::new();
    let mut events = cache.events();
    run(&cache, &key("1"), Duration::from_secs(30), 1).await;

    assert_eq!(events.recv().await.unwrap().status, QueryStatus::Loading);
    let done = events.recv().await.unwrap();
    assert_eq!(done.key, key("1"));
    assert_eq!(done.status, QueryStatus::Success);
  }

  #[tokio::test]
  async fn test_second_caller_joins_running_fetch() {
    let cache = QueryCache::new();
    let k = key("1");
    let stale = Duration::from_secs(30);
    let (generation, _future) = start(&cache, &k, stale, 1);

    match cache.plan_fetch(&k, stale, ready(2)) {
      FetchPlan::Join { generation: joined, .. } => assert_eq!(joined, generation),
      _ => panic!("expected to join the running fetch"),
    }
  }

  #[tokio::test]
  async fn test_abandoned_fetch_frees_the_key() {
    let cache = QueryCache::new();
    let k = key("1");
    let stale = Duration::from_secs(30);
    let (generation, future) = start(&cache, &k, stale, 1);

    cache.abandon(&k, generation);
    assert_eq!(cache.status(&k), QueryStatus::Idle);
    let outcome = future.await;
    cache.complete(&k, generation, outcome);
    assert_eq!(cache.snapshot::<u32>(&k).data(), None);

    let (next, _) = start(&cache, &k, stale, 2);
    assert_ne!(next, generation);
    // Abandoning an older generation leaves the current fetch alone
    cache.abandon(&k, generation);
    assert_eq!(cache.status(&k), QueryStatus::Loading);
  }

  #[tokio::test]
  async fn test_invalidate_during_fetch_keeps_result_stale() {
    let cache = QueryCache::new();
    let k = key("1");
    let stale = Duration::from_secs(120);
    let (generation, future) = start(&cache, &k, stale, 1);

    assert_eq!(cache.invalidate(&k), 1);
    let outcome = future.await;
    cache.complete(&k, generation, outcome);

    assert_eq!(cache.snapshot::<u32>(&k).data(), Some(&1));
    assert!(matches!(
      cache.plan_fetch(&k, stale, ready(2)),
      FetchPlan::Start { .. }
    ));
  }

  #[tokio::test]
  async fn test_direct_write_discards_running_fetch() {
    let cache = QueryCache::new();
    let k = key("1");
    let stale = Duration::from_secs(120);
    let (generation, future) = start(&cache, &k, stale, 1);

    cache.set_data(&k, Arc::new(9u32));
    let outcome = future.await;
    cache.complete(&k, generation, outcome);

    assert_eq!(cache.snapshot::<u32>(&k).data(), Some(&9));
    assert!(cache.snapshot::<u32>(&k).fetching.is_none());
    assert!(matches!(
      cache.plan_fetch(&k, stale, ready(2)),
      FetchPlan::Fresh
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_through_window_boundary() {
    let cache = QueryCache::new();
    let k = key("1");
    let stale = Duration::from_secs(30);
    run(&cache, &k, stale, 1).await;

    tokio::time::advance(stale).await;
    assert!(matches!(cache.plan_fetch(&k, stale, ready(2)), FetchPlan::Fresh));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(matches!(cache.plan_fetch(&k, stale, ready(2)), FetchPlan::Start { .. }));
  }

  #[tokio::test]
  async fn test_zero_window_always_refetches() {
    let cache = QueryCache::new();
    let k = key("1");
    run(&cache, &k, Duration::ZERO, 1).await;
    assert!(matches!(
      cache.plan_fetch(&k, Duration::ZERO, ready(2)),
      FetchPlan::Start { .. }
    ));
  }

  #[test]
  fn test_wrong_type_reads_as_no_data() {
    let cache = QueryCache::new();
    cache.set_data(&key("1"), Arc::new(1u32));
    assert_eq!(cache.snapshot::<String>(&key("1")).data(), None);
    assert_eq!(cache.snapshot::<u32>(&key("1")).data(), Some(&1));
  }
}
