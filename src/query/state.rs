//! Observable state of cached queries.

use std::sync::Arc;
use tokio::time::Instant;

use crate::error::ApiError;
use crate::pagination::Page;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing has been fetched (or the query is disabled)
  Idle,
  /// First fetch in progress, no data yet
  Loading,
  /// Data is available
  Success,
  /// The last fetch failed
  Error,
}

/// What an in-flight fetch is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
  /// Fetching (or refetching) the whole resource or its first page
  Initial,
  /// Appending a page to an infinite query
  NextPage,
}

/// Snapshot of one cache entry, typed for the consumer.
#[derive(Debug)]
pub struct QueryResult<T> {
  pub status: QueryStatus,
  pub data: Option<Arc<T>>,
  pub error: Option<ApiError>,
  /// When the data was last written by a successful fetch
  pub fetched_at: Option<Instant>,
  /// Set while a fetch for this key is outstanding
  pub fetching: Option<FetchKind>,
}

impl<T> QueryResult<T> {
  pub fn idle() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      fetching: None,
    }
  }

  pub fn is_idle(&self) -> bool {
    self.status == QueryStatus::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn is_fetching(&self) -> bool {
    self.fetching.is_some()
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }
}

impl<T> Clone for QueryResult<T> {
  fn clone(&self) -> Self {
    Self {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      fetching: self.fetching,
    }
  }
}

/// Pages of an infinite query together with the cursor used to fetch each one.
///
/// `pages` and `page_params` always have the same length. The first page is
/// fetched without a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct InfiniteData<T> {
  pages: Vec<Page<T>>,
  page_params: Vec<Option<String>>,
}

impl<T> InfiniteData<T> {
  pub fn first(page: Page<T>) -> Self {
    Self {
      pages: vec![page],
      page_params: vec![None],
    }
  }

  pub fn push(&mut self, page: Page<T>, param: Option<String>) {
    self.pages.push(page);
    self.page_params.push(param);
  }

  pub fn pages(&self) -> &[Page<T>] {
    &self.pages
  }

  pub fn page_params(&self) -> &[Option<String>] {
    &self.page_params
  }

  pub fn last_page(&self) -> Option<&Page<T>> {
    self.pages.last()
  }

  /// All items across pages, in page order.
  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flat_map(|page| page.results.iter())
  }

  pub fn item_count(&self) -> usize {
    self.pages.iter().map(|page| page.results.len()).sum()
  }
}

/// Snapshot of an infinite query.
#[derive(Debug)]
pub struct InfiniteResult<T> {
  pub query: QueryResult<InfiniteData<T>>,
  /// True when the most recent page yields a next cursor
  pub has_next_page: bool,
}

impl<T> InfiniteResult<T> {
  pub fn status(&self) -> QueryStatus {
    self.query.status
  }

  pub fn data(&self) -> Option<&InfiniteData<T>> {
    self.query.data()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.query.error()
  }

  pub fn is_fetching_next_page(&self) -> bool {
    self.query.fetching == Some(FetchKind::NextPage)
  }

  /// Flattened items, empty when nothing has been fetched.
  pub fn items(&self) -> Vec<&T> {
    self.data().map(|d| d.items().collect()).unwrap_or_default()
  }
}

impl<T> Clone for InfiniteResult<T> {
  fn clone(&self) -> Self {
    Self {
      query: self.query.clone(),
      has_next_page: self.has_next_page,
    }
  }
}
