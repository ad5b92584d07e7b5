use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

/// Environment variable that overrides `api.base_url`.
pub const BACKEND_URL_ENV: &str = "MUSIC_HUB_BACKEND_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Backend root, without the `/api` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Page size for popular / by-country / search requests.
    #[serde(default = "default_station_limit")]
    pub station_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// How long a stream may take to produce audio before it counts as offline.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Author name attached to new comments.
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            station_limit: default_station_limit(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            start_timeout_secs: default_start_timeout_secs(),
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_station_limit() -> usize {
    30
}

fn default_volume() -> f32 {
    0.8
}

fn default_start_timeout_secs() -> u64 {
    15
}

fn default_display_name() -> String {
    "Anonymous".to_string()
}

impl Config {
    /// Load from the user config dir, writing defaults on first run, then
    /// apply the environment override.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_override(std::env::var(BACKEND_URL_ENV).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Replace the backend URL when `value` is a non-blank override.
    pub fn apply_env_override(&mut self, value: Option<String>) {
        if let Some(url) = value.map(|v| v.trim().to_string()) {
            if !url.is_empty() {
                self.api.base_url = url;
            }
        }
    }
}
