//! Persisted server configuration, stored in `config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identifies which music server to open a session against.
/// Replacing it invalidates the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub host: String,
    #[serde(default = "default_mpd_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerDescriptor {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            password: None,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The secondary web server that exposes cover files next to the music.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverServerConfig {
    /// Including scheme, e.g. `http://nas.local`.
    pub hostname: String,
    #[serde(default = "default_cover_port")]
    pub port: u16,
    /// Name of the cover file inside each album directory.
    #[serde(default = "default_cover_filename")]
    pub cover_filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: Option<ServerDescriptor>,
    #[serde(default)]
    pub covers: Option<CoverServerConfig>,
    /// Edge size of generated thumbnails, in pixels.
    #[serde(default = "default_cover_size")]
    pub cover_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: None,
            covers: None,
            cover_size: default_cover_size(),
        }
    }
}

fn default_mpd_port() -> u16 {
    6600
}

fn default_cover_port() -> u16 {
    80
}

fn default_cover_filename() -> String {
    "cover.jpg".to_string()
}

fn default_cover_size() -> u32 {
    180
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file at {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Malformed(#[from] toml::de::Error),
}

impl Settings {
    pub fn config_dir() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let dir = home.join(".config").join("rempd");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        dir
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Default directory for cached cover thumbnails.
    pub fn cover_cache_dir() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".cache").join("rempd").join("covers")
    }
}
