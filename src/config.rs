use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub stale_times: StaleTimes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// API root, e.g. "https://learn.example.com/api/v1/"
  pub base_url: String,
  /// Whole-request timeout; expiry is reported as a network error
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_connect_timeout_secs")]
  pub connect_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_connect_timeout_secs() -> u64 {
  10
}

impl ApiConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      timeout_secs: default_timeout_secs(),
      connect_timeout_secs: default_connect_timeout_secs(),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_secs)
  }
}

/// Stale windows per resource family, in seconds.
///
/// Forums rarely change; posts are the most active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StaleTimes {
  pub forums: u64,
  pub forum_detail: u64,
  pub forum_topics: u64,
  pub topic_detail: u64,
  pub topic_posts: u64,
}

impl Default for StaleTimes {
  fn default() -> Self {
    Self {
      forums: 5 * 60,
      forum_detail: 5 * 60,
      forum_topics: 60,
      topic_detail: 2 * 60,
      topic_posts: 30,
    }
  }
}

impl StaleTimes {
  pub fn forums(&self) -> Duration {
    Duration::from_secs(self.forums)
  }

  pub fn forum_detail(&self) -> Duration {
    Duration::from_secs(self.forum_detail)
  }

  pub fn forum_topics(&self) -> Duration {
    Duration::from_secs(self.forum_topics)
  }

  pub fn topic_detail(&self) -> Duration {
    Duration::from_secs(self.topic_detail)
  }

  pub fn topic_posts(&self) -> Duration {
    Duration::from_secs(self.topic_posts)
  }
}

impl Config {
  /// Configuration with every default and the given API root.
  pub fn for_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig::new(base_url),
      stale_times: StaleTimes::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./courseforum.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/courseforum/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/courseforum/config.yaml\n\
                 or pass --base-url."
      )),
    }
  }

  /// Load configuration with `base_url` taking precedence over the file's.
  ///
  /// Without a config file a base URL alone is enough; a file that exists but
  /// cannot be read or parsed is still an error.
  pub fn load_with_base_url(explicit_path: Option<&Path>, base_url: Option<String>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => Some(p.to_path_buf()),
      None => Self::find_config_file(),
    };
    Self::from_file_and_base_url(path.as_deref(), base_url)
  }

  fn from_file_and_base_url(path: Option<&Path>, base_url: Option<String>) -> Result<Self> {
    match (path, base_url) {
      (Some(path), base_url) => {
        let mut config = Self::load_from_path(path)?;
        if let Some(url) = base_url {
          config.api.base_url = url;
        }
        Ok(config)
      }
      (None, Some(url)) => Ok(Self::for_base_url(url)),
      (None, None) => Self::load(None),
    }
  }

  pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("courseforum.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("courseforum").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API token from environment variables, if one is set.
  ///
  /// Checks COURSEFORUM_TOKEN first, then COURSEFORUM_API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("COURSEFORUM_TOKEN")
      .or_else(|_| std::env::var("COURSEFORUM_API_TOKEN"))
      .ok()
      .filter(|token| !token.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_load_applies_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api:\n  base_url: https://learn.example.com/api/v1/").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.base_url, "https://learn.example.com/api/v1/");
    assert_eq!(config.api.timeout(), Duration::from_secs(30));
    assert_eq!(config.stale_times, StaleTimes::default());
    assert_eq!(config.stale_times.forums(), Duration::from_secs(300));
    assert_eq!(config.stale_times.topic_detail(), Duration::from_secs(120));
    assert_eq!(config.stale_times.topic_posts(), Duration::from_secs(30));
  }

  #[test]
  fn test_stale_times_are_overridable() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "api:\n  base_url: http://localhost:8000/api/\n  timeout_secs: 5\nstale_times:\n  topic_posts: 5"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.timeout_secs, 5);
    assert_eq!(config.stale_times.topic_posts, 5);
    assert_eq!(config.stale_times.forums, 300);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/courseforum.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_base_url_overrides_file_and_keeps_stale_times() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "api:\n  base_url: http://localhost:8000/api/\nstale_times:\n  forums: 10"
    )
    .unwrap();

    let config =
      Config::from_file_and_base_url(Some(file.path()), Some("http://other.test/api/".into()))
        .unwrap();
    assert_eq!(config.api.base_url, "http://other.test/api/");
    assert_eq!(config.stale_times.forums, 10);
  }

  #[test]
  fn test_base_url_without_file_uses_defaults() {
    let config = Config::from_file_and_base_url(None, Some("http://other.test/api/".into())).unwrap();
    assert_eq!(config.api.base_url, "http://other.test/api/");
    assert_eq!(config.stale_times, StaleTimes::default());
  }

  #[test]
  fn test_broken_file_is_reported_even_with_base_url() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stale_times: [").unwrap();

    let err = Config::from_file_and_base_url(Some(file.path()), Some("http://other.test/api/".into()))
      .unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api: [").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }
}
