use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{QueryCacheConfig, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub query: QueryConfig,
  /// Override for the preferences database location
  pub prefs_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend base url, e.g. https://review.example.com
  pub url: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
  30_000
}

/// Query cache defaults. Individual queries and mutations may override the
/// retry counts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
  pub stale_time_ms: u64,
  pub gc_time_ms: u64,
  pub read_retries: u32,
  pub write_retries: u32,
  pub retry_base_delay_ms: u64,
  pub retry_max_delay_ms: u64,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_time_ms: 0,
      gc_time_ms: 300_000,
      read_retries: 3,
      write_retries: 1,
      retry_base_delay_ms: 1_000,
      retry_max_delay_ms: 30_000,
    }
  }
}

impl QueryConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_millis(self.stale_time_ms)
  }

  fn policy(&self, retries: u32) -> RetryPolicy {
    RetryPolicy::new(retries).with_delays(
      Duration::from_millis(self.retry_base_delay_ms),
      Duration::from_millis(self.retry_max_delay_ms),
    )
  }

  pub fn read_retry(&self) -> RetryPolicy {
    self.policy(self.read_retries)
  }

  pub fn write_retry(&self) -> RetryPolicy {
    self.policy(self.write_retries)
  }

  pub fn cache_config(&self) -> QueryCacheConfig {
    QueryCacheConfig {
      read_retry: self.read_retry(),
      gc_time: Duration::from_millis(self.gc_time_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./workbench.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/workbench/config.yaml
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
        "No configuration file found. Create one at ~/.config/workbench/config.yaml\n\
                 with at least `api: {{ url: https://... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("workbench.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("workbench").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents)?;
    if let Ok(url) = std::env::var("WORKBENCH_API_URL") {
      config.api.url = url;
    }
    Ok(config)
  }

  /// Get the backend API token from the environment, if one is set.
  ///
  /// Checks WORKBENCH_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("WORKBENCH_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: http://localhost:8000\n").unwrap();
    assert_eq!(config.api.timeout_ms, 30_000);
    assert_eq!(config.query.read_retries, 3);
    assert_eq!(config.query.write_retries, 1);
    assert_eq!(config.query.stale_time(), Duration::ZERO);
    assert!(config.prefs_path.is_none());
  }

  #[test]
  fn test_query_overrides() {
    let config = Config::parse(
      "api:\n  url: http://localhost:8000\nquery:\n  read_retries: 5\n  retry_base_delay_ms: 200\n",
    )
    .unwrap();
    let read = config.query.read_retry();
    assert_eq!(read.retries, 5);
    assert_eq!(read.base_delay, Duration::from_millis(200));
    assert_eq!(config.query.write_retry().retries, 1);
  }

  #[test]
  fn test_missing_api_section_is_an_error() {
    assert!(Config::parse("query:\n  read_retries: 1\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path() {
    let err = Config::load(Some(Path::new("/nonexistent/workbench.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
