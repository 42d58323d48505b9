use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub tiles: TilesConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  /// Override for the directory holding the database and logs
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Backend REST root, e.g. "http://localhost:8080/api"
  pub base_url: String,
  pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api".to_string(),
      request_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Failed replay attempts after which a queued alert is dropped
  pub max_retries: u32,
  /// Age horizon for the maintenance sweep
  pub max_age_days: u32,
  /// How often watch mode retries while alerts are pending
  pub replay_interval_secs: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      max_age_days: 7,
      replay_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TilesConfig {
  pub capacity_bytes: u64,
  /// Keep tiles in the database (true) or only in memory for this process
  pub persist: bool,
}

impl Default for TilesConfig {
  fn default() -> Self {
    Self {
      capacity_bytes: 50 * 1024 * 1024,
      persist: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Path appended to the API base for reachability probes
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: "/ping".to_string(),
      probe_interval_secs: 30,
    }
  }
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./safetrail.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/safetrail/config.yaml
  ///
  /// Falls back to defaults when nothing is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        tracing::debug!("no config file found, using defaults");
        Config::default()
      }
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("safetrail.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("safetrail").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn validate(&self) -> Result<()> {
    if self.queue.max_retries == 0 {
      return Err(eyre!("queue.max_retries must be at least 1"));
    }
    if self.tiles.capacity_bytes == 0 {
      return Err(eyre!("tiles.capacity_bytes must be greater than 0"));
    }
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("api.base_url '{}' is not a valid URL: {}", self.api.base_url, e))?;
    Ok(())
  }

  /// Directory holding the database and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("safetrail"))
  }

  /// Get the backend bearer token from the environment, if any.
  ///
  /// Checks SAFETRAIL_API_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("SAFETRAIL_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.queue.max_retries, 3);
    assert_eq!(config.queue.max_age_days, 7);
    assert_eq!(config.tiles.capacity_bytes, 50 * 1024 * 1024);
    assert!(config.tiles.persist);
    assert_eq!(config.connectivity.probe_interval_secs, 30);
    assert_eq!(config.api.base_url, "http://localhost:8080/api");
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_section_keeps_other_defaults() {
    let config = Config::from_yaml(
      r#"
queue:
  max_retries: 5
tiles:
  capacity_bytes: 1024
"#,
    )
    .unwrap();
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.queue.max_age_days, 7);
    assert_eq!(config.tiles.capacity_bytes, 1024);
    assert!(config.tiles.persist);
  }

  #[test]
  fn test_zero_retries_rejected() {
    let config = Config::from_yaml("queue:\n  max_retries: 0\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_bad_base_url_rejected() {
    let config = Config::from_yaml("api:\n  base_url: not a url\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_data_dir_override() {
    let config = Config::from_yaml("data_dir: /tmp/safetrail-test\n").unwrap();
    assert_eq!(
      config.data_dir().unwrap(),
      PathBuf::from("/tmp/safetrail-test")
    );
  }
}
