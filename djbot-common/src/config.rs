//! Configuration loading
//!
//! Resolution follows a fixed priority order:
//! 1. Command-line flags (applied by the binary after `resolve()`)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is not an error: a warning is logged and the
//! defaults are used. A malformed file is a `Config` error.

use crate::api::auth::Credentials;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "DJBOT_CONFIG";
/// Working directory for downloaded audio
pub const ENV_DOWNLOAD_DIR: &str = "DOWNLOAD_DIR";
/// HTTP control port
pub const ENV_HTTP_PORT: &str = "HTTP_CONTROL_PORT";
/// Janitor retention window in hours
pub const ENV_RETENTION_HOURS: &str = "FILE_RETENTION_HOURS";
/// Control-surface username
pub const ENV_AUTH_USER: &str = "HTTP_AUTH_USER";
/// Control-surface password
pub const ENV_AUTH_PASS: &str = "HTTP_AUTH_PASS";

const DEFAULT_PASSWORD: &str = "secret";

/// Complete bot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// Working directory holding downloaded audio
    pub download_dir: PathBuf,

    /// HTTP control port
    pub http_port: u16,

    /// Files older than this many hours are swept by the janitor
    pub retention_hours: u64,

    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub acquisition: AcquisitionConfig,
    pub voice: VoiceConfig,

    /// Narration before each track; disabled when absent
    pub announce: Option<AnnounceConfig>,
}

/// Control-surface credential pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

/// External resolver tools and their time budgets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// General URL/search resolver
    pub yt_dlp: String,
    /// Specialised tool for direct Spotify track links
    pub spotdl: String,
    /// Duration probe
    pub ffprobe: String,
    /// Timeout for the general resolver (and playlist expansion)
    pub generic_timeout_secs: u64,
    /// Timeout for the specialised tool
    pub specialized_timeout_secs: u64,
    /// Timeout for a duration probe
    pub probe_timeout_secs: u64,
}

/// Local voice sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    /// ffmpeg binary used to play streams
    pub ffmpeg: String,
    /// Channel joined implicitly by `play` when not connected
    pub default_channel: Option<String>,
    /// Idle polling interval of the playback engine
    pub poll_interval_ms: u64,
    /// Initial volume, 0-100
    pub initial_volume: u8,
    pub channels: Vec<ChannelConfig>,
}

/// One connectable output channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub id: String,
    pub name: String,
    /// ffmpeg output format (`pulse`, `alsa`, `ogg`, `null`, ...)
    #[serde(default = "default_channel_format")]
    pub format: String,
    /// ffmpeg output target (device name, URL or file)
    #[serde(default = "default_channel_target")]
    pub target: String,
    /// Encode as opus at this bitrate before handing to the output
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
}

/// External narration command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnounceConfig {
    /// Command and arguments; `{text}` and `{output}` are substituted
    pub command: Vec<String>,
    /// Upper bound for rendering plus playback of one announcement
    pub timeout_secs: u64,
}

fn default_channel_format() -> String {
    "pulse".to_string()
}

fn default_channel_target() -> String {
    "default".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            http_port: 8080,
            retention_hours: 24,
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            acquisition: AcquisitionConfig::default(),
            voice: VoiceConfig::default(),
            announce: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            spotdl: "spotdl".to_string(),
            ffprobe: "ffprobe".to_string(),
            generic_timeout_secs: 30,
            specialized_timeout_secs: 300,
            probe_timeout_secs: 15,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            default_channel: Some("default".to_string()),
            poll_interval_ms: 1000,
            initial_volume: 100,
            channels: vec![ChannelConfig {
                id: "default".to_string(),
                name: "Default output".to_string(),
                format: default_channel_format(),
                target: default_channel_target(),
                bitrate_kbps: None,
            }],
        }
    }
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "espeak".to_string(),
                "-w".to_string(),
                "{output}".to_string(),
                "{text}".to_string(),
            ],
            timeout_secs: 30,
        }
    }
}

/// OS-dependent default working directory
fn default_download_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("djbot").join("downloads"))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

impl BotConfig {
    /// Parse a TOML document; absent keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load from a TOML file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DOWNLOAD_DIR) {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup(ENV_HTTP_PORT) {
            self.http_port = port.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a port number, got '{}'", ENV_HTTP_PORT, port))
            })?;
        }
        if let Some(hours) = lookup(ENV_RETENTION_HOURS) {
            self.retention_hours = hours.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of hours, got '{}'",
                    ENV_RETENTION_HOURS, hours
                ))
            })?;
        }
        if let Some(user) = lookup(ENV_AUTH_USER) {
            self.auth.username = user;
        }
        if let Some(pass) = lookup(ENV_AUTH_PASS) {
            self.auth.password = pass;
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.auth.username.is_empty() {
            return Err(Error::Config("auth.username must not be empty".to_string()));
        }
        if self.voice.initial_volume > 100 {
            return Err(Error::Config(format!(
                "voice.initial_volume must be 0-100, got {}",
                self.voice.initial_volume
            )));
        }
        if let Some(default) = &self.voice.default_channel {
            if !self.voice.channels.iter().any(|c| &c.id == default) {
                return Err(Error::Config(format!(
                    "voice.default_channel '{}' is not a configured channel",
                    default
                )));
            }
        }
        if let Some(announce) = &self.announce {
            if announce.command.is_empty() {
                return Err(Error::Config("announce.command must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Configured credential pair
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.auth.username, &self.auth.password)
    }

    /// Janitor retention window
    pub fn retention(&self) -> Duration {
        crate::time::hours_to_duration(self.retention_hours)
    }

    /// True when the compiled-in password is still active
    pub fn uses_default_password(&self) -> bool {
        self.auth.password == DEFAULT_PASSWORD
    }
}

/// Locates the config file and produces the effective `BotConfig`
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// `cli_path` is the value of `--config`, if given
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Config file location: CLI flag, then `DJBOT_CONFIG`, then the OS config dir
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("djbot").join("config.toml"))
    }

    /// Load file (or defaults) and apply environment overrides
    pub fn resolve(&self) -> Result<BotConfig> {
        let mut config = match self.config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                BotConfig::load_file(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using defaults",
                    path.display()
                );
                BotConfig::default()
            }
            None => {
                warn!("No config directory available, using defaults");
                BotConfig::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}
