//! Error taxonomy shared by the API client and the query cache.

use thiserror::Error;

/// Failure of a single API call.
///
/// Errors are `Clone` so that one in-flight fetch can hand the same failure to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// The server answered with a non-2xx status.
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  /// The request never produced a response (DNS, refused connection, reset, timeout).
  #[error("Network error: {message}")]
  Network { message: String },

  /// A 2xx response whose body was not the expected JSON.
  #[error("Failed to decode response: {message}")]
  Decode { message: String },
}

impl ApiError {
  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self::Http {
      status,
      message: message.into(),
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::Network {
      message: message.into(),
    }
  }

  /// HTTP status, if the server responded at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_not_found(&self) -> bool {
    self.status() == Some(404)
  }

  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::network(format!("request timed out: {}", err))
    } else if err.is_decode() {
      Self::Decode {
        message: err.to_string(),
      }
    } else {
      // Statuses are checked before the body is read, so only transport failures remain
      Self::network(err.to_string())
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    Self::Decode {
      message: err.to_string(),
    }
  }
}
