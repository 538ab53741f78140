// Configuration management for Retrocap

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::encoding::ContainerFormat;
use crate::error::CaptureError;
use crate::recording::DEFAULT_RING_CAPACITY;
use crate::video::DEFAULT_GOP_SIZE;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Directory relative recording paths are resolved against
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Packets kept for retroactive saves
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// How long a live read waits for the first decoded frame
    #[serde(default = "default_first_frame_timeout_ms")]
    pub first_frame_timeout_ms: u64,

    /// Container used when a recording path has no known extension
    #[serde(default = "default_format")]
    pub default_format: String,

    /// Length of continuous fragments
    #[serde(default = "default_fragment_secs")]
    pub fragment_secs: u32,

    /// Keyframe interval forced on hardware capture encoders
    #[serde(default = "default_gop_size")]
    pub capture_gop_size: u32,

    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where finished fragments are handed off, if anywhere
    #[serde(default)]
    pub upload: Option<UploadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    pub spool_dir: PathBuf,

    /// Delete the local fragment once it has been handed off
    #[serde(default = "default_true")]
    pub remove_after_upload: bool,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            ring_capacity: default_ring_capacity(),
            first_frame_timeout_ms: default_first_frame_timeout_ms(),
            default_format: default_format(),
            fragment_secs: default_fragment_secs(),
            capture_gop_size: default_gop_size(),
            log_level: default_log_level(),
            upload: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` or return defaults
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.ring_capacity == 0 {
            return Err(CaptureError::Config("ring_capacity must be at least 1".into()));
        }
        if self.capture_gop_size == 0 {
            return Err(CaptureError::Config("capture_gop_size must be at least 1".into()));
        }
        if self.fragment_secs == 0 {
            return Err(CaptureError::Config("fragment_secs must be positive".into()));
        }
        self.container_format()?;
        if let Some(upload) = &self.upload {
            if upload.queue_depth == 0 {
                return Err(CaptureError::Config("upload.queue_depth must be at least 1".into()));
            }
        }
        Ok(())
    }

    pub fn container_format(&self) -> Result<ContainerFormat, CaptureError> {
        Ok(self.default_format.parse::<ContainerFormat>()?)
    }

    /// Resolve a recording path against `output_dir`
    pub fn resolve_output(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }
}

/// `<config dir>/retrocap/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retrocap")
        .join("config.toml")
}

fn default_output_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Retrocap")
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_first_frame_timeout_ms() -> u64 {
    5000
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_fragment_secs() -> u32 {
    60
}

fn default_gop_size() -> u32 {
    DEFAULT_GOP_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_depth() -> usize {
    16
}

fn default_true() -> bool {
    true
}
