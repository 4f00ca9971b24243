//! Configuration file handling
//!
//! Configuration is read from `~/.config/alcotrack/config.toml` (or the
//! platform equivalent). A missing file yields the defaults; command-line
//! flags override whatever the file says.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::cache::{Manifest, VersionTag};
use crate::error::ConfigError;

/// Version tag of the asset generation this build ships
pub const DEFAULT_VERSION: &str = "alcohol-tracker-v1";

/// Origin used when none is configured
pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub cache: CacheConfig,
}

/// Where the tracker lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Data endpoint URL for logging and statistics
    pub endpoint: Option<String>,
    /// Origin the static assets are served from
    pub origin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            origin: DEFAULT_ORIGIN.to_string(),
        }
    }
}

/// Offline cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Version tag of the generation to install
    pub version: String,
    /// Cache directory; defaults to the XDG cache dir
    pub dir: Option<PathBuf>,
    /// Assets to precache on install
    pub manifest: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            dir: None,
            manifest: Manifest::default().assets().to_vec(),
        }
    }
}

impl CacheConfig {
    pub fn version_tag(&self) -> VersionTag {
        VersionTag::new(self.version.clone())
    }

    /// The configured manifest, or the built-in one when the list is empty
    pub fn manifest(&self) -> Manifest {
        Manifest::new(self.manifest.iter().cloned()).unwrap_or_default()
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub origin: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "alcotrack").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, falling back to defaults when the file is absent
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&content).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if overrides.endpoint.is_some() {
            self.app.endpoint = overrides.endpoint;
        }
        if let Some(origin) = overrides.origin {
            self.app.origin = origin;
        }
        if overrides.cache_dir.is_some() {
            self.cache.dir = overrides.cache_dir;
        }
        self
    }
}
