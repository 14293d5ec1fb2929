use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_USER_AGENT;

/// Which stream probe confirms playability
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Decode a few frames with mpv
    #[default]
    Mpv,
    /// Check status and content type over HTTP
    Http,
}

/// Resolver used for portal requests
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DnsMode {
    #[default]
    System,
    Hickory,
}

/// Receiver fingerprint sent with every portal request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceProfile {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            language: default_language(),
            timezone: None,
            user_agent: default_user_agent(),
        }
    }
}

impl DeviceProfile {
    /// Configured zone, else the system zone, else the zone most portals expect.
    pub fn timezone(&self) -> String {
        if let Some(tz) = &self.timezone {
            return tz.clone();
        }
        if let Ok(tz) = iana_time_zone::get_timezone() {
            return tz;
        }
        "Europe/London".to_string()
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CheckerConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_pool_width")]
    pub pool_width: usize,
    #[serde(default = "default_samples_per_genre")]
    pub samples_per_genre: usize,
    #[serde(default = "default_max_relevant_genres")]
    pub max_relevant_genres: usize,
    #[serde(default = "default_max_pages_per_genre")]
    pub max_pages_per_genre: u64,
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default)]
    pub exhaustive: bool,
    #[serde(default)]
    pub probe: ProbeMode,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default)]
    pub dns: DnsMode,
    #[serde(default)]
    pub device: DeviceProfile,
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
}

fn default_pool_width() -> usize {
    10
}

fn default_samples_per_genre() -> usize {
    3
}

fn default_max_relevant_genres() -> usize {
    3
}

fn default_max_pages_per_genre() -> u64 {
    crate::session::DEFAULT_MAX_PAGES
}

fn default_max_failed_attempts() -> u32 {
    3
}

fn default_probe_timeout_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    15
}

fn default_mpv_path() -> String {
    "mpv".to_string()
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_width: default_pool_width(),
            samples_per_genre: default_samples_per_genre(),
            max_relevant_genres: default_max_relevant_genres(),
            max_pages_per_genre: default_max_pages_per_genre(),
            max_failed_attempts: default_max_failed_attempts(),
            exhaustive: false,
            probe: ProbeMode::default(),
            probe_timeout_secs: default_probe_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            dns: DnsMode::default(),
            device: DeviceProfile::default(),
            mpv_path: default_mpv_path(),
        }
    }
}

impl CheckerConfig {
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("com", "portalscan", "portal-scan")
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Loads `config.json` from the platform config dir, or defaults when absent.
    pub fn load() -> Result<Self, anyhow::Error> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(CheckerConfig::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: CheckerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), anyhow::Error> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Explicit `database_path`, else `portals.db` in the platform data dir.
    pub fn database_path(&self) -> Result<PathBuf, anyhow::Error> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = Self::project_dirs()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine data directory"))?;
        fs::create_dir_all(dirs.data_dir())?;
        Ok(dirs.data_dir().join("portals.db"))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
