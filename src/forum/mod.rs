//! Course platform forum: API client, cache keys and cached queries.

pub mod client;
pub mod keys;
pub mod queries;
pub mod types;

pub use client::ForumClient;
pub use keys::{ForumKeys, TopicKeys};
pub use queries::ForumQueries;
