//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// One library root directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathConfig {
    /// Directory holding the videos
    pub path: PathBuf,
    /// Identity prefix for ids of videos in this directory (may be empty)
    #[serde(default)]
    pub prefix: String,
    /// Keep the client's file name for uploads into this directory
    #[serde(default)]
    pub preserve_upload_filename: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("videos"),
            prefix: String::new(),
            preserve_upload_filename: false,
        }
    }
}

fn default_library() -> Vec<PathConfig> {
    vec![PathConfig::default()]
}

/// HTTP server and storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Location of the view counter database
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Scratch directory for staged uploads and transcode targets
    #[serde(default = "default_upload_path")]
    pub upload_path: PathBuf,
    /// Keep the client's file name for every upload (overrides per-path setting)
    #[serde(default)]
    pub preserve_upload_filename: bool,
    /// Ceiling for uploaded and imported videos, in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("reel.db")
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_size() -> u64 {
    104_857_600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store_path: default_store_path(),
            upload_path: default_upload_path(),
            preserve_upload_filename: false,
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Thumbnail extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThumbnailerConfig {
    /// Timeout for a single thumbnail extraction, in seconds (0 = unbounded)
    #[serde(default = "default_thumbnailer_timeout")]
    pub timeout: u64,
    /// Offset into the video of the extracted frame, in seconds
    #[serde(default = "default_position_from_start")]
    pub position_from_start: u32,
}

fn default_thumbnailer_timeout() -> u64 {
    60
}

fn default_position_from_start() -> u32 {
    3
}

impl Default for ThumbnailerConfig {
    fn default() -> Self {
        Self {
            timeout: default_thumbnailer_timeout(),
            position_from_start: default_position_from_start(),
        }
    }
}

/// A lower quality rendition generated after every ingest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantConfig {
    /// Dimension spec handed to the transcoder (`640x360`, `hd720`, ...)
    pub size: String,
    /// Suffix written after the `#` marker (`360p` -> `clip#360p.mp4`)
    pub suffix: String,
}

/// Transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    /// Transcoder executable
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Timeout for a single transcode or resize, in seconds (0 = unbounded)
    #[serde(default = "default_transcoder_timeout")]
    pub timeout: u64,
    /// Maximum concurrent ingestion runs (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent: u32,
    /// Variants in generation order
    #[serde(default)]
    pub variants: Vec<VariantConfig>,
}

fn default_program() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_transcoder_timeout() -> u64 {
    300
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout: default_transcoder_timeout(),
            max_concurrent: 0,
            variants: Vec::new(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_library")]
    pub library: Vec<PathConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub thumbnailer: ThumbnailerConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library: default_library(),
            server: ServerConfig::default(),
            thumbnailer: ThumbnailerConfig::default(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    // Accept "true", "1", "yes" as true; "false", "0", "no" as false
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - REEL_HOST -> server.host
    /// - REEL_PORT -> server.port
    /// - REEL_STORE_PATH -> server.store_path
    /// - REEL_UPLOAD_PATH -> server.upload_path
    /// - REEL_MAX_UPLOAD_SIZE -> server.max_upload_size
    /// - REEL_PRESERVE_UPLOAD_FILENAME -> server.preserve_upload_filename
    /// - REEL_TRANSCODER_TIMEOUT -> transcoder.timeout
    /// - REEL_TRANSCODER_PROGRAM -> transcoder.program
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("REEL_HOST") {
            if !val.is_empty() {
                self.server.host = val;
            }
        }

        if let Ok(val) = env::var("REEL_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("REEL_STORE_PATH") {
            if !val.is_empty() {
                self.server.store_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("REEL_UPLOAD_PATH") {
            if !val.is_empty() {
                self.server.upload_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("REEL_MAX_UPLOAD_SIZE") {
            if let Ok(size) = val.parse::<u64>() {
                self.server.max_upload_size = size;
            }
        }

        if let Ok(val) = env::var("REEL_PRESERVE_UPLOAD_FILENAME") {
            if let Some(preserve) = parse_bool(&val) {
                self.server.preserve_upload_filename = preserve;
            }
        }

        if let Ok(val) = env::var("REEL_TRANSCODER_TIMEOUT") {
            if let Ok(secs) = val.parse::<u64>() {
                self.transcoder.timeout = secs;
            }
        }

        if let Ok(val) = env::var("REEL_TRANSCODER_PROGRAM") {
            if !val.is_empty() {
                self.transcoder.program = PathBuf::from(val);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Built-in defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}
