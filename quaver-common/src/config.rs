//! Configuration loading
//!
//! Resolution priority order:
//! 1. Environment variables (highest priority)
//! 2. TOML config file (`$QUAVER_CONFIG`, else the platform config dir)
//! 3. Compiled defaults (fallback)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::Platform;
use crate::{Error, Result};

/// Top-level configuration for the guild player.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub player: PlayerConfig,
    pub cache: CacheConfig,
    pub soundcloud: SoundCloudConfig,
}

/// Connection and playback tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// How long a joining connection may sit in Signalling/Connecting
    /// before it is destroyed
    pub ready_timeout_secs: u64,
    /// Grace window after a channel-move style disconnect before giving up
    /// on automatic transport recovery
    pub recovery_window_secs: u64,
    /// Rejoin attempts allowed before a disconnect becomes fatal
    pub max_rejoin_attempts: u32,
    /// Audio-resource creation attempts per queue item before it is skipped
    pub max_resource_attempts: u32,
    /// Platform used when a query's shape and the caller's hint decide nothing
    pub default_platform: Platform,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 20,
            recovery_window_secs: 5,
            max_rejoin_attempts: 5,
            max_resource_attempts: 2,
            default_platform: Platform::Youtube,
        }
    }
}

impl PlayerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }
}

/// Resolver metadata cache tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub song_ttl_secs: u64,
    pub playlist_ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            song_ttl_secs: 24 * 60 * 60,
            playlist_ttl_secs: 24 * 60 * 60,
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn song_ttl(&self) -> Duration {
        Duration::from_secs(self.song_ttl_secs)
    }

    pub fn playlist_ttl(&self) -> Duration {
        Duration::from_secs(self.playlist_ttl_secs)
    }
}

/// SoundCloud API credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SoundCloudConfig {
    pub client_id: Option<String>,
    pub oauth_token: Option<String>,
}

impl Config {
    /// Load configuration with the full priority order.
    ///
    /// A missing config file falls through to defaults; a malformed one is
    /// an error (silently ignoring a typo'd file hides misconfiguration).
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_from(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration, falling back to defaults on any error.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load configuration, using defaults: {e}");
                Self::default()
            }
        }
    }

    /// Parse configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Apply environment overrides through an injected lookup.
    ///
    /// Split out from [`Config::load`] so tests can drive it without
    /// mutating process environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("QUAVER_DEFAULT_PLATFORM") {
            match value.parse() {
                Ok(platform) => self.player.default_platform = platform,
                Err(e) => warn!("Ignoring QUAVER_DEFAULT_PLATFORM: {e}"),
            }
        }
        if let Some(value) = lookup("QUAVER_SOUNDCLOUD_CLIENT_ID") {
            self.soundcloud.client_id = Some(value);
        }
        if let Some(value) = lookup("QUAVER_SOUNDCLOUD_OAUTH_TOKEN") {
            self.soundcloud.oauth_token = Some(value);
        }
        if let Some(value) = lookup("QUAVER_READY_TIMEOUT_SECS") {
            match value.parse() {
                Ok(secs) => self.player.ready_timeout_secs = secs,
                Err(_) => warn!("Ignoring non-numeric QUAVER_READY_TIMEOUT_SECS"),
            }
        }
    }
}

/// Config file location: `$QUAVER_CONFIG`, else `<config dir>/quaver/config.toml`.
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("QUAVER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("quaver").join("config.toml"))
}
