/// Tool configuration
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for chosen-dl. Every field has a sensible default; a TOML
/// file or environment variables may override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum delay between successive remote extractions, in seconds.
    pub rate_limit_secs: f64,

    /// Page navigation timeout, in seconds.
    pub page_load_timeout_secs: u64,

    /// How long to wait for the video player element, in seconds.
    pub video_wait_timeout_secs: u64,

    /// Where ad-hoc single-download extractions are cached.
    pub auto_cache_path: PathBuf,

    /// Default quality tag when none is given on the command line.
    pub default_quality: String,

    /// Default subtitle language code.
    pub default_subtitle_lang: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit_secs: 1.5,
            page_load_timeout_secs: 60,
            video_wait_timeout_secs: 10,
            auto_cache_path: PathBuf::from(".cache/downloads.json"),
            default_quality: "1080p".to_string(),
            default_subtitle_lang: "zh-TW".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the first usable TOML file, falling back to
    /// environment overrides on top of the defaults.
    pub fn load() -> Result<Self> {
        let config_paths = ["chosen-dl.toml", "~/.config/chosen-dl/config.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Ok(Self::from_env())
    }

    /// Defaults with environment variable overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rate_limit) = std::env::var("CHOSEN_DL_RATE_LIMIT") {
            if let Ok(secs) = rate_limit.parse::<f64>() {
                if secs.is_finite() && secs >= 0.0 {
                    config.rate_limit_secs = secs;
                } else {
                    tracing::warn!("Ignoring invalid CHOSEN_DL_RATE_LIMIT: {}", rate_limit);
                }
            }
        }
        if let Ok(timeout) = std::env::var("CHOSEN_DL_PAGE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                config.page_load_timeout_secs = secs;
            }
        }
        if let Ok(quality) = std::env::var("CHOSEN_DL_QUALITY") {
            config.default_quality = quality;
        }
        if let Ok(lang) = std::env::var("CHOSEN_DL_SUBTITLE_LANG") {
            config.default_subtitle_lang = lang;
        }
        if let Ok(path) = std::env::var("CHOSEN_DL_AUTO_CACHE") {
            config.auto_cache_path = PathBuf::from(path);
        }

        config
    }

    /// The rate limit as a `Duration`. Negative or non-finite values, which
    /// a config file can still smuggle in, collapse to no delay instead of
    /// panicking in `Duration::from_secs_f64`.
    pub fn rate_limit(&self) -> Duration {
        if self.rate_limit_secs.is_finite() && self.rate_limit_secs > 0.0 {
            Duration::from_secs_f64(self.rate_limit_secs)
        } else {
            Duration::ZERO
        }
    }
}
