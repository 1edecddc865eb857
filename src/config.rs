use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::UnauthorizedBehavior;
use crate::cache::QueryDefaults;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub queries: QueryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL joined in front of every relative endpoint.
  /// Empty means requests stay root-relative and a reverse proxy routes them.
  pub base_url: String,
  /// Where root-relative URLs are sent on the wire.
  pub origin: String,
  /// Request timeout; 0 disables it.
  pub timeout_ms: u64,
  /// Extra URL fragments that never receive the bearer token, on top of `/auth`.
  pub auth_exempt: Vec<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      origin: "http://localhost:5000".to_string(),
      timeout_ms: DEFAULT_TIMEOUT_MS,
      auth_exempt: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
  /// Seconds before a cached read is refetched. Unset means never.
  pub stale_time_secs: Option<u64>,
  /// Automatic retries for failed reads.
  pub retry: u32,
  /// Automatic retries for failed writes.
  pub mutation_retry: u32,
  pub refetch_on_window_focus: bool,
  /// Default 401 handling for reads: "throw" or "returnNull".
  pub on_unauthorized: UnauthorizedBehavior,
}

impl QueryConfig {
  pub fn defaults(&self) -> QueryDefaults {
    QueryDefaults {
      stale_time: self.stale_time_secs.map(Duration::from_secs),
      retry: self.retry,
      mutation_retry: self.mutation_retry,
      refetch_on_window_focus: self.refetch_on_window_focus,
      on_unauthorized: self.on_unauthorized,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./carepulse.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/carepulse/config.yaml
  ///
  /// Without any file the defaults apply.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("carepulse.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("carepulse").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes as YAML null.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get a bearer token from the environment, if one is provided.
  ///
  /// Checks CAREPULSE_TOKEN.
  pub fn get_env_token() -> Option<String> {
    std::env::var("CAREPULSE_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
