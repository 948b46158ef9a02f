//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the pipeline constants.

use crate::media::ExtractionLimits;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(alias = "bot_token")]
    pub telegram_token: String,

    /// Shared directory for downloaded media
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Comma-separated list of accepted source domains (empty = any)
    #[serde(rename = "allowed_hosts", default = "default_allowed_hosts")]
    pub allowed_hosts_str: String,

    /// Resolve domain hosts and reject private addresses before extraction
    #[serde(default = "default_true")]
    pub resolve_hosts: bool,

    /// Extractor executable
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    /// Media inspection executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    /// Maximum video size in bytes
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
    /// Maximum size of a single image in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    /// Maximum number of images relayed from one post
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Extractor timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    /// Probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Requests admitted per identity within one window
    #[serde(default = "default_rate_limit_count")]
    pub rate_limit_count: usize,
    /// Rate-limit window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Files older than this are removed by the sweeper
    #[serde(default = "default_cleanup_age")]
    pub cleanup_age_secs: u64,
    /// Interval between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_download_dir() -> PathBuf {
    std::env::temp_dir().join("reel-relay")
}

fn default_allowed_hosts() -> String {
    DEFAULT_ALLOWED_HOSTS.to_string()
}

const fn default_true() -> bool {
    true
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

const fn default_max_video_bytes() -> u64 {
    MAX_VIDEO_BYTES
}

const fn default_max_image_bytes() -> u64 {
    MAX_IMAGE_BYTES
}

const fn default_max_images() -> usize {
    MAX_IMAGES
}

const fn default_download_timeout() -> u64 {
    DOWNLOAD_TIMEOUT_SECS
}

const fn default_probe_timeout() -> u64 {
    PROBE_TIMEOUT_SECS
}

const fn default_rate_limit_count() -> usize {
    RATE_LIMIT_COUNT
}

const fn default_rate_limit_window() -> u64 {
    RATE_LIMIT_WINDOW_SECS
}

const fn default_cleanup_age() -> u64 {
    CLEANUP_AGE_SECS
}

const fn default_sweep_interval() -> u64 {
    SWEEP_INTERVAL_SECS
}

/// Build the layered configuration source.
///
/// Order: `config/default`, `config/<RUN_MODE>`, `config/local`, `APP__*`
/// variables, then plain environment variables (empty values are ignored).
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use reel_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the bot token is empty.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;

        if settings.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message(
                "TELEGRAM_TOKEN is not set".to_string(),
            ));
        }

        Ok(settings)
    }

    /// Returns the accepted source domains, lowercased
    #[must_use]
    pub fn allowed_hosts(&self) -> Vec<String> {
        self.allowed_hosts_str
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .map(|token| token.trim().trim_start_matches('.').to_lowercase())
            .filter(|token| !token.is_empty())
            .collect()
    }

    /// Extraction limits derived from the settings
    #[must_use]
    pub fn limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_video_bytes: self.max_video_bytes,
            max_image_bytes: self.max_image_bytes,
            max_images: self.max_images,
            timeout: Duration::from_secs(self.download_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            min_video_bytes: MIN_VIDEO_BYTES,
            min_image_bytes: MIN_IMAGE_BYTES,
        }
    }

    /// Rate-limit window as a duration
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

/// Domains accepted when `ALLOWED_HOSTS` is not set
pub const DEFAULT_ALLOWED_HOSTS: &str =
    "tiktok.com,instagram.com,youtube.com,youtu.be,x.com,twitter.com";

// Media limits (Telegram Bot API upload caps)
/// Maximum video size (50 MB)
pub const MAX_VIDEO_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum photo size (10 MB)
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
/// Maximum photos in one media group
pub const MAX_IMAGES: usize = 10;
/// Smallest file accepted as a video (anti-placeholder guard)
pub const MIN_VIDEO_BYTES: u64 = 1024;
/// Smallest file accepted as an image
pub const MIN_IMAGE_BYTES: u64 = 512;
/// Extractor timeout in seconds
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 120;
/// Probe timeout in seconds
pub const PROBE_TIMEOUT_SECS: u64 = 10;

// Abuse protection
/// Requests per window
pub const RATE_LIMIT_COUNT: usize = 5;
/// Window length in seconds
pub const RATE_LIMIT_WINDOW_SECS: u64 = 600;

// Temp file retention
/// Files older than one hour are swept
pub const CLEANUP_AGE_SECS: u64 = 3600;
/// Sweep every ten minutes
pub const SWEEP_INTERVAL_SECS: u64 = 600;

// Telegram API retry policy
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum attempts for Telegram API retries
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
