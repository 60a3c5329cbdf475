//! Forum data layer for the course platform.
//!
//! - [`forum::ForumClient`] issues typed HTTP calls and normalizes failures into [`ApiError`]
//! - [`pagination`] turns a page's `next` link into the cursor for the following page
//! - [`query`] caches results under hierarchical keys with per-family stale windows
//!   and drives infinite pagination

pub mod config;
pub mod error;
pub mod forum;
pub mod logging;
pub mod pagination;
pub mod query;

#[cfg(test)]
mod test_server;

pub use error::ApiError;
