//! Cursor pagination: server pages and extraction of the continuation token.
//!
//! The server links to the following page with an opaque `next` URL. The only
//! part we care about is its `cursor` query parameter, which becomes the page
//! parameter for the next fetch.

use serde::{Deserialize, Serialize};
use url::Url;

/// One page of a cursor-paginated collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
  #[serde(default = "Vec::new")]
  pub results: Vec<T>,
  #[serde(default)]
  pub next: Option<String>,
  #[serde(default)]
  pub previous: Option<String>,
  #[serde(default)]
  pub count: u64,
}

impl<T> Page<T> {
  /// Cursor for the page following this one, if any.
  pub fn next_cursor(&self) -> Option<String> {
    next_cursor(self.next.as_deref())
  }
}

/// Name of the query parameter carrying the continuation token.
pub const CURSOR_PARAM: &str = "cursor";

/// Root-relative links are resolved against this; only the query string is read.
const RELATIVE_BASE: &str = "http://localhost";

/// Extract the decoded `cursor` parameter from a `next` link.
///
/// Accepted link forms are absolute `http://` or `https://` URLs and
/// root-relative paths (`/api/topics/1/posts/?cursor=...`). Anything else,
/// including links that fail to parse, is treated as the end of the list.
/// An empty cursor value is treated the same way.
pub fn next_cursor(next: Option<&str>) -> Option<String> {
  let url = parse_link(next?.trim())?;

  url
    .query_pairs()
    .find(|(name, _)| name == CURSOR_PARAM)
    .map(|(_, value)| value.into_owned())
    .filter(|cursor| !cursor.is_empty())
}

/// Page parameter for the page after `page`, using the default `cursor` extraction.
pub fn next_page_param<T>(page: &Page<T>) -> Option<String> {
  page.next_cursor()
}

fn parse_link(link: &str) -> Option<Url> {
  if link.is_empty() {
    return None;
  }

  // "//host/path" is scheme-relative, not root-relative
  if link.starts_with('/') && !link.starts_with("//") {
    let base = Url::parse(RELATIVE_BASE).ok()?;
    return base.join(link).ok();
  }

  let url = Url::parse(link).ok()?;
  matches!(url.scheme(), "http" | "https").then_some(url)
}
