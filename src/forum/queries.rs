//! Forum API calls read through the query cache.

use color_eyre::Result;
use tracing::info;

use crate::config::{Config, StaleTimes};
use crate::error::ApiError;
use crate::query::{InfiniteQuery, QueryClient, QueryOptions, QueryResult};

use super::client::ForumClient;
use super::keys::{ForumKeys, TopicKeys};
use super::types::{
  ForumDetail, ForumIndex, ForumStats, ModerationAction, NewPost, Post, Topic, TopicFilters,
};

/// Forum client with transparent caching.
///
/// Reads go through the shared [`QueryClient`] with the stale window of their
/// resource family; writes go straight to the API and invalidate what they
/// affect.
#[derive(Clone)]
pub struct ForumQueries {
  api: ForumClient,
  queries: QueryClient,
  stale: StaleTimes,
}

/// Queries keyed by an id are disabled until the id is known.
fn is_present(id: Option<&str>) -> bool {
  id.is_some_and(|id| !id.is_empty())
}

impl ForumQueries {
  pub fn new(api: ForumClient, queries: QueryClient, stale: StaleTimes) -> Self {
    Self {
      api,
      queries,
      stale,
    }
  }

  /// Create an API client and a fresh cache from configuration.
  pub fn from_config(config: &Config) -> Result<Self> {
    let api = ForumClient::new(&config.api)?;
    Ok(Self::new(api, QueryClient::new(), config.stale_times))
  }

  pub fn queries(&self) -> &QueryClient {
    &self.queries
  }

  pub fn api(&self) -> &ForumClient {
    &self.api
  }

  pub async fn forums(&self) -> QueryResult<ForumIndex> {
    let api = self.api.clone();
    self
      .queries
      .fetch_resource(
        &ForumKeys::list(),
        QueryOptions::new(self.stale.forums()),
        move || async move { api.list_forums().await },
      )
      .await
  }

  pub async fn forum_detail(&self, slug: Option<&str>) -> QueryResult<ForumDetail> {
    let api = self.api.clone();
    let slug = slug.unwrap_or_default().to_string();
    let options = QueryOptions::new(self.stale.forum_detail()).enabled(!slug.is_empty());
    self
      .queries
      .fetch_resource(&ForumKeys::detail(&slug), options, move || async move {
        api.get_forum_detail(&slug).await
      })
      .await
  }

  pub async fn forum_stats(&self, slug: Option<&str>) -> QueryResult<ForumStats> {
    let api = self.api.clone();
    let slug = slug.unwrap_or_default().to_string();
    let options = QueryOptions::new(self.stale.forum_detail()).enabled(!slug.is_empty());
    self
      .queries
      .fetch_resource(&ForumKeys::stats(&slug), options, move || async move {
        api.get_forum_stats(&slug).await
      })
      .await
  }

  /// Paginated topics of one forum
  pub fn forum_topics(&self, slug: Option<&str>) -> InfiniteQuery<Topic> {
    let api = self.api.clone();
    let enabled = is_present(slug);
    let slug = slug.unwrap_or_default().to_string();
    let options = QueryOptions::new(self.stale.forum_topics()).enabled(enabled);
    self
      .queries
      .infinite_query(ForumKeys::topics(&slug), options, move |cursor| {
        let api = api.clone();
        let slug = slug.clone();
        async move { api.list_forum_topics(&slug, cursor.as_deref()).await }
      })
  }

  /// Paginated topics across forums; each filter set is cached separately
  pub fn topics(&self, filters: TopicFilters) -> InfiniteQuery<Topic> {
    let api = self.api.clone();
    let key = TopicKeys::list(Some(&filters));
    let options = QueryOptions::new(self.stale.forum_topics());
    self.queries.infinite_query(key, options, move |cursor| {
      let api = api.clone();
      let filters = filters.clone();
      async move { api.list_topics(&filters, cursor.as_deref()).await }
    })
  }

  pub async fn topic_detail(&self, topic_id: Option<&str>) -> QueryResult<Topic> {
    let api = self.api.clone();
    let enabled = is_present(topic_id);
    let topic_id = topic_id.unwrap_or_default().to_string();
    let options = QueryOptions::new(self.stale.topic_detail()).enabled(enabled);
    self
      .queries
      .fetch_resource(&TopicKeys::detail(&topic_id), options, move || async move {
        api.get_topic_detail(&topic_id).await
      })
      .await
  }

  /// Paginated posts of a topic, oldest first as served
  pub fn topic_posts(&self, topic_id: Option<&str>) -> InfiniteQuery<Post> {
    let api = self.api.clone();
    let enabled = is_present(topic_id);
    let topic_id = topic_id.unwrap_or_default().to_string();
    let options = QueryOptions::new(self.stale.topic_posts()).enabled(enabled);
    self
      .queries
      .infinite_query(TopicKeys::posts(&topic_id), options, move |cursor| {
        let api = api.clone();
        let topic_id = topic_id.clone();
        async move { api.list_topic_posts(&topic_id, cursor.as_deref()).await }
      })
  }

  /// Reply to a topic, then invalidate its posts and detail.
  pub async fn create_post(&self, topic_id: &str, post: NewPost) -> Result<Post, ApiError> {
    let created = self.api.create_post(topic_id, &post).await?;
    info!(topic_id, post_id = created.id, "Post created");
    // detail(id) is a prefix of posts(id)
    self.queries.invalidate(&TopicKeys::detail(topic_id));
    Ok(created)
  }

  /// Apply a moderation action and refresh the affected topic views.
  pub async fn moderate_topic(
    &self,
    topic_id: &str,
    action: ModerationAction,
  ) -> Result<Topic, ApiError> {
    let topic = self.api.moderate_topic(topic_id, action).await?;
    info!(topic_id, ?action, "Topic moderated");
    self
      .queries
      .set_query_data(&TopicKeys::detail(topic_id), topic.clone());
    self.queries.invalidate(&TopicKeys::all().with("list"));
    if let Some(forum) = &topic.forum {
      self.queries.invalidate(&ForumKeys::topics(forum));
    }
    Ok(topic)
  }

  pub async fn delete_post(&self, post_id: &str) -> Result<(), ApiError> {
    self.api.delete_post(post_id).await?;
    info!(post_id, "Post deleted");
    self.queries.invalidate(&TopicKeys::all());
    Ok(())
  }
}
