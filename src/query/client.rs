//! Read-through query client over a [`QueryCache`].

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Duration;

use super::cache::{AnyData, CacheEvent, FetchOutcome, FetchPlan, QueryCache};
use super::key::QueryKey;
use super::state::{InfiniteData, InfiniteResult, QueryResult, QueryStatus};
use crate::error::ApiError;
use crate::pagination::{next_page_param, Page};

/// Per-request options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// How long successful data is served without refetching
  pub stale_time: Duration,
  /// Disabled queries never fetch and stay idle
  pub enabled: bool,
}

impl QueryOptions {
  pub fn new(stale_time: Duration) -> Self {
    Self {
      stale_time,
      enabled: true,
    }
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self::new(Duration::ZERO)
  }
}

/// Cheaply cloneable handle to a shared [`QueryCache`].
///
/// Construct one at startup and pass it to everything that reads through the
/// cache. Dropping the last handle tears the cache down.
#[derive(Clone, Default)]
pub struct QueryClient {
  cache: Arc<QueryCache>,
}

impl QueryClient {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_cache(cache: Arc<QueryCache>) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &Arc<QueryCache> {
    &self.cache
  }

  /// Fetch a resource with cache-first semantics.
  ///
  /// - disabled: nothing is fetched and the current snapshot (idle if new) is returned
  /// - fresh data: returned without calling `fetcher`
  /// - a fetch already in flight for `key`: awaited instead of starting another
  /// - otherwise `fetcher` runs and its result is stored
  ///
  /// Failures are stored on the entry and reported through the result,
  /// never returned as `Err`.
  pub async fn fetch_resource<T, F, Fut>(
    &self,
    key: &QueryKey,
    options: QueryOptions,
    fetcher: F,
  ) -> QueryResult<T>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    if !options.enabled {
      return self.cache.snapshot(key);
    }

    let fetch = async move { fetcher().await.map(|data| Arc::new(data) as AnyData) }.boxed();

    // A dropped starter leaves the fetch in place for the next reader to join
    match self.cache.plan_fetch(key, options.stale_time, fetch) {
      FetchPlan::Fresh => {}
      FetchPlan::Start { generation, future } | FetchPlan::Join { generation, future } => {
        let outcome = future.await;
        self.cache.complete(key, generation, outcome);
      }
    }

    self.cache.snapshot(key)
  }

  /// Build an infinite query whose pages come from `fetch_page(cursor)`.
  ///
  /// The first page is fetched with `None`; later pages with the cursor taken
  /// from the previous page's `next` link.
  pub fn infinite_query<T, F, Fut>(
    &self,
    key: QueryKey,
    options: QueryOptions,
    fetch_page: F,
  ) -> InfiniteQuery<T>
  where
    T: Clone + Send + Sync + 'static,
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Page<T>, ApiError>> + Send + 'static,
  {
    InfiniteQuery {
      client: self.clone(),
      key,
      options,
      fetch_page: Arc::new(move |cursor: Option<String>| fetch_page(cursor).boxed()),
      next_param: Arc::new(next_page_param::<T>),
    }
  }

  /// Current snapshot without fetching.
  pub fn query_result<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryResult<T> {
    self.cache.snapshot(key)
  }

  pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
    self.cache.set_data(key, Arc::new(data));
  }

  /// Mark everything under `prefix` stale so the next read refetches.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    self.cache.invalidate(prefix)
  }

  /// Abandon in-flight fetches under `prefix`.
  pub fn cancel(&self, prefix: &QueryKey) -> usize {
    self.cache.cancel(prefix)
  }

  pub fn remove(&self, key: &QueryKey) -> bool {
    self.cache.remove(key)
  }

  pub fn clear(&self) {
    self.cache.clear();
  }

  /// Observe changes to one key. The entry is kept alive by gc while subscribed.
  pub fn subscribe(&self, key: &QueryKey) -> QuerySubscription {
    // Subscribe to events before registering so no change is missed
    let events = self.cache.events();
    self.cache.add_observer(key);
    QuerySubscription {
      cache: Arc::clone(&self.cache),
      key: key.clone(),
      events,
    }
  }
}

/// Registered interest in one key.
pub struct QuerySubscription {
  cache: Arc<QueryCache>,
  key: QueryKey,
  events: broadcast::Receiver<CacheEvent>,
}

impl QuerySubscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Wait for the next change to this key and return its status.
  pub async fn changed(&mut self) -> Option<QueryStatus> {
    loop {
      match self.events.recv().await {
        Ok(event) if event.key == self.key => return Some(event.status),
        Ok(_) => continue,
        // Missed events, report where the entry stands now
        Err(broadcast::error::RecvError::Lagged(_)) => return Some(self.cache.status(&self.key)),
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}

impl Drop for QuerySubscription {
  fn drop(&mut self) {
    self.cache.remove_observer(&self.key);
  }
}

type PageFetcherFn<T> =
  Arc<dyn Fn(Option<String>) -> BoxFuture<'static, Result<Page<T>, ApiError>> + Send + Sync>;

type NextParamFn<T> = Arc<dyn Fn(&Page<T>) -> Option<String> + Send + Sync>;

/// Cursor-paginated query stored as one cache entry of [`InfiniteData`].
pub struct InfiniteQuery<T> {
  client: QueryClient,
  key: QueryKey,
  options: QueryOptions,
  fetch_page: PageFetcherFn<T>,
  next_param: NextParamFn<T>,
}

impl<T: Clone + Send + Sync + 'static> InfiniteQuery<T> {
  /// Replace how the next page parameter is derived from a page.
  pub fn with_next_param<F>(mut self, next_param: F) -> Self
  where
    F: Fn(&Page<T>) -> Option<String> + Send + Sync + 'static,
  {
    self.next_param = Arc::new(next_param);
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Fetch the first page, with the same cache semantics as `fetch_resource`.
  pub async fn fetch(&self) -> InfiniteResult<T> {
    let fetch_page = Arc::clone(&self.fetch_page);
    let query = self
      .client
      .fetch_resource(&self.key, self.options, move || async move {
        let page = fetch_page(None).await?;
        Ok::<_, ApiError>(InfiniteData::first(page))
      })
      .await;

    self.wrap(query)
  }

  /// Fetch and append the page after the last one.
  ///
  /// No-op when the query is disabled, nothing is loaded yet, the last page
  /// has no next cursor, or any fetch for this key is still outstanding.
  pub async fn fetch_next_page(&self) -> InfiniteResult<T> {
    if !self.options.enabled {
      return self.result();
    }

    let fetch_page = Arc::clone(&self.fetch_page);
    let next_param = Arc::clone(&self.next_param);

    let started = self.client.cache.plan_next_page(&self.key, |data| {
      let current = Arc::clone(data).downcast::<InfiniteData<T>>().ok()?;
      let cursor = current.last_page().and_then(|page| next_param(page))?;

      Some(
        async move {
          let page = fetch_page(Some(cursor.clone())).await?;
          let mut data = InfiniteData::clone(&current);
          data.push(page, Some(cursor));
          Ok::<_, ApiError>(Arc::new(data) as AnyData)
        }
        .boxed(),
      )
    });

    if let Some((generation, future)) = started {
      let guard = PendingFetch {
        cache: &self.client.cache,
        key: &self.key,
        generation,
        done: false,
      };
      guard.complete(future.await);
    }

    self.result()
  }

  /// Current snapshot without fetching.
  pub fn result(&self) -> InfiniteResult<T> {
    self.wrap(self.client.cache.snapshot(&self.key))
  }

  fn wrap(&self, query: QueryResult<InfiniteData<T>>) -> InfiniteResult<T> {
    let has_next_page = query
      .data()
      .and_then(|data| data.last_page())
      .and_then(|page| (self.next_param)(page))
      .is_some();

    InfiniteResult {
      query,
      has_next_page,
    }
  }
}

/// Abandons a next-page fetch whose caller stopped waiting for it, so the
/// late page is discarded and the key is free for the next request.
struct PendingFetch<'a> {
  cache: &'a QueryCache,
  key: &'a QueryKey,
  generation: u64,
  done: bool,
}

impl PendingFetch<'_> {
  fn complete(mut self, outcome: FetchOutcome) {
    self.done = true;
    self.cache.complete(self.key, self.generation, outcome);
  }
}

impl Drop for PendingFetch<'_> {
  fn drop(&mut self) {
    if !self.done {
      self.cache.abandon(self.key, self.generation);
    }
  }
}

impl<T> Clone for InfiniteQuery<T> {
  fn clone(&self) -> Self {
    Self {
      client: self.client.clone(),
      key: self.key.clone(),
      options: self.options,
      fetch_page: Arc::clone(&self.fetch_page),
      next_param: Arc::clone(&self.next_param),
    }
  }
}
