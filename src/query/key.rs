//! Hierarchical query keys.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One segment of a [`QueryKey`].
///
/// Map segments hold filter sets. They are ordered maps, so two filter sets
/// with the same pairs address the same entry regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum KeySegment {
  Str(String),
  Map(BTreeMap<String, String>),
}

impl From<&str> for KeySegment {
  fn from(s: &str) -> Self {
    KeySegment::Str(s.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(s: String) -> Self {
    KeySegment::Str(s)
  }
}

impl From<&String> for KeySegment {
  fn from(s: &String) -> Self {
    KeySegment::Str(s.clone())
  }
}

impl From<BTreeMap<String, String>> for KeySegment {
  fn from(map: BTreeMap<String, String>) -> Self {
    KeySegment::Map(map)
  }
}

/// Identifies one cache entry, e.g. `["topics", "detail", "42", "posts"]`.
///
/// Keys compare structurally. A key is inside the invalidation scope of every
/// key that is a prefix of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<KeySegment>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Extend the key with one more segment.
  pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// True if `prefix` matches the leading segments of this key (or all of it).
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

/// Renders the key as compact JSON, e.g. `["forums","detail","general"]`.
impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
    f.write_str(&json)
  }
}
