//! Query keys for forum resources.
//!
//! Keys are hierarchical so that invalidating a prefix covers everything
//! beneath it: `TopicKeys::detail("42")` covers `TopicKeys::posts("42")`.

use crate::query::QueryKey;

use super::types::TopicFilters;

const FORUMS: &str = "forums";
const TOPICS: &str = "topics";

/// Keys for the forums family
pub struct ForumKeys;

impl ForumKeys {
  pub fn all() -> QueryKey {
    QueryKey::new([FORUMS])
  }

  pub fn list() -> QueryKey {
    Self::all().with("list")
  }

  pub fn detail(slug: &str) -> QueryKey {
    Self::all().with("detail").with(slug)
  }

  pub fn topics(slug: &str) -> QueryKey {
    Self::detail(slug).with("topics")
  }

  pub fn stats(slug: &str) -> QueryKey {
    Self::detail(slug).with("stats")
  }
}

/// Keys for the topics family
pub struct TopicKeys;

impl TopicKeys {
  pub fn all() -> QueryKey {
    QueryKey::new([TOPICS])
  }

  /// Topic list; a non-empty filter set becomes the trailing segment.
  pub fn list(filters: Option<&TopicFilters>) -> QueryKey {
    let key = Self::all().with("list");
    match filters {
      Some(filters) if !filters.is_empty() => key.with(filters.to_pairs()),
      _ => key,
    }
  }

  pub fn detail(id: &str) -> QueryKey {
    Self::all().with("detail").with(id)
  }

  pub fn posts(id: &str) -> QueryKey {
    Self::detail(id).with("posts")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_shapes() {
    assert_eq!(
      TopicKeys::posts("42"),
      QueryKey::new(["topics", "detail", "42", "posts"])
    );
    assert_eq!(
      ForumKeys::detail("general"),
      QueryKey::new(["forums", "detail", "general"])
    );
    assert_eq!(ForumKeys::list(), QueryKey::new(["forums", "list"]));
    assert_eq!(
      ForumKeys::stats("general"),
      QueryKey::new(["forums", "detail", "general", "stats"])
    );
  }

  #[test]
  fn test_builders_are_deterministic() {
    assert_eq!(TopicKeys::posts("42"), TopicKeys::posts("42"));
    assert_eq!(ForumKeys::topics("general"), ForumKeys::topics("general"));
  }

  #[test]
  fn test_distinct_filters_map_to_distinct_keys() {
    let rust = TopicFilters {
      search: Some("rust".to_string()),
      ..Default::default()
    };
    let go = TopicFilters {
      search: Some("go".to_string()),
      ..Default::default()
    };

    assert_ne!(TopicKeys::list(Some(&rust)), TopicKeys::list(Some(&go)));
    assert_eq!(TopicKeys::list(Some(&rust)), TopicKeys::list(Some(&rust.clone())));
    assert_eq!(
      TopicKeys::list(Some(&TopicFilters::default())),
      TopicKeys::list(None)
    );
    assert_eq!(TopicKeys::list(Some(&rust)).len(), 3);
  }

  #[test]
  fn test_detail_scope_covers_posts() {
    assert!(TopicKeys::posts("42").starts_with(&TopicKeys::detail("42")));
    assert!(ForumKeys::topics("general").starts_with(&ForumKeys::all()));
    assert!(!TopicKeys::posts("42").starts_with(&ForumKeys::all()));
  }
}
