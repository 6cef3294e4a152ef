use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::db::Database;
use crate::queue::DrainPolicy;

/// App-shell assets cached at install time.
const CRITICAL_ASSETS: &[&str] = &[
  "/",
  "/src/index.html",
  "/src/css/app.css",
  "/src/js/app.js",
  "/src/js/i18n.js",
  "/src/js/mockData.js",
  "/src/js/router.js",
  "/manifest.json",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub storage: StorageConfig,
  pub upload: UploadConfig,
  pub connectivity: ConnectivityConfig,
  pub cache: CacheConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to $XDG_DATA_HOME/kali-sync/offline.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
  /// Collector URL that accepts one record per POST
  pub endpoint: Option<String>,
  pub timeout_secs: u64,
  /// What a drain does after a failed upload: continue or stop
  pub policy: DrainPolicy,
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self {
      endpoint: None,
      timeout_secs: 10,
      policy: DrainPolicy::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// URL probed for reachability (defaults to the cache origin)
  pub probe_url: Option<String>,
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      probe_interval_secs: 30,
      probe_timeout_secs: 5,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation name prefix
  pub name: String,
  /// Bump to install a new shell generation
  pub version: u32,
  /// Origin serving the app shell
  pub origin: String,
  /// Shell asset paths, relative to the origin
  pub assets: Vec<String>,
  pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "kali".to_string(),
      version: 1,
      origin: "http://localhost:5173".to_string(),
      assets: CRITICAL_ASSETS.iter().map(|s| s.to_string()).collect(),
      fetch_timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Also write logs to a daily rolling file
  pub file: bool,
  /// Log file directory (defaults to the data directory)
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kali.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kali-sync/config.yaml
  ///
  /// Without a file the built-in defaults are used.
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
      None => {
        debug!("no config file found, using defaults");
        Ok(Config::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kali.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kali-sync").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin()?;
    Ok(config)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Database::default_path()?),
    }
  }

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.cache.origin)
      .map_err(|e| eyre!("Invalid cache origin '{}': {}", self.cache.origin, e))
  }

  /// Shell asset URLs resolved against the origin.
  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin()?;
    self
      .cache
      .assets
      .iter()
      .map(|asset| {
        origin
          .join(asset)
          .map_err(|e| eyre!("Invalid asset path '{}': {}", asset, e))
      })
      .collect()
  }

  /// Resolve a path or absolute URL given on the command line.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    Url::parse(target).or_else(|_| {
      self
        .origin()?
        .join(target)
        .map_err(|e| eyre!("Invalid URL or path '{}': {}", target, e))
    })
  }

  pub fn upload_endpoint(&self) -> Result<Url> {
    let endpoint = self
      .upload
      .endpoint
      .as_deref()
      .ok_or_else(|| eyre!("No upload endpoint configured. Set upload.endpoint in kali.yaml."))?;
    Url::parse(endpoint).map_err(|e| eyre!("Invalid upload endpoint '{}': {}", endpoint, e))
  }

  pub fn probe_url(&self) -> Result<Url> {
    match &self.connectivity.probe_url {
      Some(url) => Url::parse(url).map_err(|e| eyre!("Invalid probe URL '{}': {}", url, e)),
      None => self.origin(),
    }
  }

  pub fn upload_timeout(&self) -> Duration {
    Duration::from_secs(self.upload.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.probe_interval_secs)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.cache.fetch_timeout_secs)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.connectivity.probe_timeout_secs)
  }

  /// Get the collector token from the environment, if any.
  ///
  /// Checks KALI_UPLOAD_TOKEN.
  pub fn get_upload_token() -> Option<String> {
    std::env::var("KALI_UPLOAD_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}
