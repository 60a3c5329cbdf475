use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{ApiConfig, Config};
use crate::error::ApiError;
use crate::pagination::CURSOR_PARAM;

use super::types::{
  ForumDetail, ForumIndex, ForumStats, ModerationAction, NewPost, Page, Post, Topic, TopicFilters,
};

/// Course platform forum API client
#[derive(Clone)]
pub struct ForumClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ForumClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .connect_timeout(config.connect_timeout())
      .user_agent(concat!("courseforum/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Self::with_http_client(http, &config.base_url, Config::get_api_token())
  }

  /// Build on an existing reqwest client (custom timeouts, proxies, tests).
  pub fn with_http_client(
    http: reqwest::Client,
    base_url: &str,
    token: Option<String>,
  ) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;

    if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
      return Err(eyre!("API base URL must be an http(s) URL: {}", base_url));
    }

    // Relative endpoint paths must land under the base path
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// List forum categories with site stats
  pub async fn list_forums(&self) -> Result<ForumIndex, ApiError> {
    self.get(self.endpoint(&["forums"])).await
  }

  /// Get a single forum by slug. Unknown slugs fail with HTTP 404.
  pub async fn get_forum_detail(&self, slug: &str) -> Result<ForumDetail, ApiError> {
    self.get(self.endpoint(&["forums", slug])).await
  }

  pub async fn get_forum_stats(&self, slug: &str) -> Result<ForumStats, ApiError> {
    self.get(self.endpoint(&["forums", slug, "stats"])).await
  }

  /// One page of a forum's topics
  pub async fn list_forum_topics(
    &self,
    slug: &str,
    cursor: Option<&str>,
  ) -> Result<Page<Topic>, ApiError> {
    let mut url = self.endpoint(&["forums", slug, "topics"]);
    with_cursor(&mut url, cursor);
    self.get(url).await
  }

  /// One page of topics across forums, narrowed by `filters`
  pub async fn list_topics(
    &self,
    filters: &TopicFilters,
    cursor: Option<&str>,
  ) -> Result<Page<Topic>, ApiError> {
    let mut url = self.endpoint(&["topics"]);
    for (name, value) in filters.to_pairs() {
      url.query_pairs_mut().append_pair(&name, &value);
    }
    with_cursor(&mut url, cursor);
    self.get(url).await
  }

  pub async fn get_topic_detail(&self, topic_id: &str) -> Result<Topic, ApiError> {
    self.get(self.endpoint(&["topics", topic_id])).await
  }

  /// One page of a topic's posts. Without a cursor this is the first page.
  pub async fn list_topic_posts(
    &self,
    topic_id: &str,
    cursor: Option<&str>,
  ) -> Result<Page<Post>, ApiError> {
    let mut url = self.endpoint(&["topics", topic_id, "posts"]);
    with_cursor(&mut url, cursor);
    self.get(url).await
  }

  /// Reply to a topic
  pub async fn create_post(&self, topic_id: &str, post: &NewPost) -> Result<Post, ApiError> {
    let url = self.endpoint(&["topics", topic_id, "posts"]);
    self.send_json(Method::POST, url, post).await
  }

  /// Pin, unpin, lock or unlock a topic. Returns the updated topic.
  pub async fn moderate_topic(
    &self,
    topic_id: &str,
    action: ModerationAction,
  ) -> Result<Topic, ApiError> {
    let url = self.endpoint(&["topics", topic_id, "moderate"]);
    let body = serde_json::json!({ "action": action });
    self.send_json(Method::POST, url, &body).await
  }

  pub async fn delete_post(&self, post_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["posts", post_id]);
    debug!(method = "DELETE", url = %url, "API request");
    let response = self.authorize(self.http.delete(url)).send().await?;
    check_status(response).await?;
    Ok(())
  }

  /// Endpoint URL under the base path, one percent-encoded segment per item,
  /// with the trailing slash the API expects.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    // Checked in the constructor: the base URL can have path segments
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments).push("");
    }
    url
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
    debug!(method = "GET", url = %url, "API request");
    let response = self.authorize(self.http.get(url)).send().await?;
    decode(response).await
  }

  async fn send_json<B, T>(&self, method: Method, url: Url, body: &B) -> Result<T, ApiError>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    debug!(method = %method, url = %url, "API request");
    let request = self
      .http
      .request(method, url)
      .header(CONTENT_TYPE, "application/json")
      .body(serde_json::to_vec(body)?);
    let response = self.authorize(request).send().await?;
    decode(response).await
  }
}

fn with_cursor(url: &mut Url, cursor: Option<&str>) {
  if let Some(cursor) = cursor {
    url.query_pairs_mut().append_pair(CURSOR_PARAM, cursor);
  }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
  let response = check_status(response).await?;
  let body = response.bytes().await?;
  Ok(serde_json::from_slice(&body)?)
}

/// Turn a non-2xx response into `ApiError::Http`.
async fn check_status(response: Response) -> Result<Response, ApiError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  let message = error_message(&body).unwrap_or_else(|| {
    status
      .canonical_reason()
      .map(String::from)
      .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()))
  });

  debug!(status = status.as_u16(), message = %message, "API error response");
  Err(ApiError::http(status.as_u16(), message))
}

/// Message from a JSON error body (`detail`, `message` or `error` field)
fn error_message(body: &str) -> Option<String> {
  let value: Value = serde_json::from_str(body).ok()?;
  ["detail", "message", "error"]
    .iter()
    .find_map(|field| value.get(field).and_then(Value::as_str))
    .map(String::from)
}
