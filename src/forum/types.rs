//! Forum entities as served by the course platform API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::pagination::Page;

/// Author reference embedded in topics and posts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
  pub id: u64,
  pub username: String,
  #[serde(default)]
  pub display_name: Option<String>,
}

impl Author {
  pub fn name(&self) -> &str {
    self.display_name.as_deref().unwrap_or(&self.username)
  }
}

/// Forum summary as listed inside a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forum {
  pub id: u64,
  pub name: String,
  pub slug: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub topic_count: u64,
  #[serde(default)]
  pub post_count: u64,
  #[serde(default)]
  pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumCategory {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub forums: Vec<Forum>,
}

/// Site-wide or per-forum counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForumStats {
  #[serde(default)]
  pub total_topics: u64,
  #[serde(default)]
  pub total_posts: u64,
  #[serde(default)]
  pub total_users: u64,
  #[serde(default)]
  pub online_users: u64,
}

/// Response of the forums index endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumIndex {
  #[serde(default)]
  pub categories: Vec<ForumCategory>,
  #[serde(default)]
  pub stats: ForumStats,
}

/// Full forum record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumDetail {
  #[serde(flatten)]
  pub forum: Forum,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub moderators: Vec<Author>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
  pub id: u64,
  pub title: String,
  #[serde(default)]
  pub slug: Option<String>,
  /// Slug of the owning forum
  #[serde(default)]
  pub forum: Option<String>,
  #[serde(default)]
  pub author: Option<Author>,
  #[serde(default)]
  pub is_pinned: bool,
  #[serde(default)]
  pub is_locked: bool,
  #[serde(default)]
  pub post_count: u64,
  #[serde(default)]
  pub view_count: u64,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub last_post_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: u64,
  #[serde(default)]
  pub topic: Option<u64>,
  #[serde(default)]
  pub author: Option<Author>,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_solution: bool,
}

/// Body for creating a reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPost {
  pub content: String,
  /// Post being replied to, for threaded replies
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent: Option<u64>,
}

impl NewPost {
  pub fn new(content: impl Into<String>) -> Self {
    Self {
      content: content.into(),
      parent: None,
    }
  }
}

/// Moderator actions on a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
  Pin,
  Unpin,
  Lock,
  Unlock,
}

/// Filters for the topic list. Unset fields are neither sent nor keyed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilters {
  pub forum: Option<String>,
  pub search: Option<String>,
  pub ordering: Option<String>,
}

impl TopicFilters {
  pub fn is_empty(&self) -> bool {
    self.forum.is_none() && self.search.is_none() && self.ordering.is_none()
  }

  /// Set filters as `(name, value)` pairs, in a stable order.
  pub fn to_pairs(&self) -> BTreeMap<String, String> {
    [
      ("forum", &self.forum),
      ("search", &self.search),
      ("ordering", &self.ordering),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.as_ref().map(|v| (name.to_string(), v.clone())))
    .collect()
  }
}
