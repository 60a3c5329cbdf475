//! Async query cache for data fetching.
//!
//! Inspired by TanStack Query: every resource lives under a hierarchical
//! [`QueryKey`], is fetched on demand, and is served from cache while it is
//! inside its stale window.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::new();
//! let key = QueryKey::new(["forums", "list"]);
//! let api = forum_client.clone();
//!
//! let result = client
//!   .fetch_resource(&key, QueryOptions::new(Duration::from_secs(300)), move || async move {
//!     api.list_forums().await
//!   })
//!   .await;
//!
//! match result.status {
//!   QueryStatus::Success => render(result.data().unwrap()),
//!   QueryStatus::Error => render_error(result.error().unwrap()),
//!   QueryStatus::Idle | QueryStatus::Loading => {}
//! }
//! ```

mod cache;
mod client;
mod key;
mod state;

pub use cache::{CacheEvent, QueryCache};
pub use client::{InfiniteQuery, QueryClient, QueryOptions, QuerySubscription};
pub use key::{KeySegment, QueryKey};
pub use state::{FetchKind, InfiniteData, InfiniteResult, QueryResult, QueryStatus};
