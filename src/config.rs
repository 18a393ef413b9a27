use chrono::Duration as ChronoDuration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::MonitorSettings;
use crate::entity::EntityType;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub sync: SyncSettings,
  /// Table name overrides for entity types whose remote table is named differently
  #[serde(default)]
  pub tables: HashMap<EntityType, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the hosted store, e.g. https://abc.supabase.co
  pub url: String,
  /// Schema watched by realtime channels
  #[serde(default = "default_schema")]
  pub schema: String,
}

fn default_schema() -> String {
  "public".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  pub retry_attempts: u32,
  pub retry_base_delay_ms: u64,
  pub cache_ttl_secs: u64,
  /// Entity type used by the reachability probe
  pub probe_collection: EntityType,
  /// How long the indicator stays up after a successful probe
  pub indicator_hide_ms: u64,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      retry_attempts: 3,
      retry_base_delay_ms: 1000,
      cache_ttl_secs: 300,
      probe_collection: EntityType::Projects,
      indicator_hide_ms: 3000,
    }
  }
}

impl SyncSettings {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(
      self.retry_attempts,
      Duration::from_millis(self.retry_base_delay_ms),
    )
  }

  pub fn cache_ttl(&self) -> Result<ChronoDuration> {
    i64::try_from(self.cache_ttl_secs)
      .ok()
      .and_then(ChronoDuration::try_seconds)
      .ok_or_else(|| eyre!("sync.cache_ttl_secs is out of range: {}", self.cache_ttl_secs))
  }

  pub fn monitor_settings(&self) -> MonitorSettings {
    MonitorSettings {
      probe_entity: self.probe_collection,
      indicator_hide_delay: Duration::from_millis(self.indicator_hide_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sitesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sitesync/config.yaml
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
        "No configuration file found. Create one at ~/.config/sitesync/config.yaml\n\
                 with at least `remote.url` set."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("sitesync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sitesync").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.sync.cache_ttl()?;
    Ok(config)
  }

  /// Get the store API key from the environment.
  pub fn get_api_key() -> Result<String> {
    std::env::var("SITESYNC_API_KEY")
      .map_err(|_| eyre!("API key not found. Set the SITESYNC_API_KEY environment variable."))
  }

  /// Session token of the signed-in user, if any.
  pub fn get_access_token() -> Option<String> {
    std::env::var("SITESYNC_ACCESS_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
