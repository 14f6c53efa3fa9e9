//! Configuration module for odeflow
//!
//! Engine-wide tunables that are not part of any individual object:
//! - Processing loop channel sizes and idle pacing
//! - Message sink hand-off queue, retry policy and report channel
//! - Logging filter and optional log directory
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory:
//! - **Linux**: `~/.config/odeflow/odeflow.toml`
//! - **macOS**: `~/Library/Application Support/odeflow/odeflow.toml`
//! - **Windows**: `%APPDATA%\odeflow\odeflow.toml`
//!
//! # Example
//!
//! ```ignore
//! use odeflow::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default(EngineConfig::default_path().unwrap());
//! let registry = odeflow::Registry::with_config(config)?;
//! ```

use crate::error::{OdeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "odeflow";

/// Config filename
pub const CONFIG_FILE: &str = "odeflow.toml";

/// Default capacity of the control → processing command channel
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default sleep when the engine has no buffer ready, in milliseconds
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 5;

/// Default upper bound of frames accepted per buffer
pub const DEFAULT_MAX_BATCH_FRAMES: usize = 64;

/// Default capacity of the message sink hand-off queue
pub const DEFAULT_SINK_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the message sink report channel
pub const DEFAULT_REPORT_CAPACITY: usize = 1024;

/// Default number of publish attempts per payload
pub const DEFAULT_MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Default backoff between publish attempts, in milliseconds
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Get the default config file path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

// ==================== Engine Config ====================

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub message_sink: MessageSinkTuning,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// `<config dir>/odeflow/odeflow.toml`
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OdeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OdeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OdeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| OdeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            OdeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.command_capacity == 0 {
            return Err(OdeError::InvalidParameter(
                "pipeline.command_capacity must be > 0".to_string(),
            ));
        }
        if self.pipeline.max_batch_frames == 0 {
            return Err(OdeError::InvalidParameter(
                "pipeline.max_batch_frames must be > 0".to_string(),
            ));
        }
        if self.message_sink.queue_capacity == 0 || self.message_sink.report_capacity == 0 {
            return Err(OdeError::InvalidParameter(
                "message_sink capacities must be > 0".to_string(),
            ));
        }
        if self.message_sink.max_publish_attempts == 0 {
            return Err(OdeError::InvalidParameter(
                "message_sink.max_publish_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Pipeline Settings ====================

/// Processing loop tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Capacity of the control → processing command channel
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Sleep applied when the engine reports no buffer ready
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Frames beyond this count in one buffer are dropped with a warning
    #[serde(default = "default_max_batch_frames")]
    pub max_batch_frames: usize,
}

fn default_command_capacity() -> usize {
    DEFAULT_COMMAND_CAPACITY
}

fn default_idle_backoff_ms() -> u64 {
    DEFAULT_IDLE_BACKOFF_MS
}

fn default_max_batch_frames() -> usize {
    DEFAULT_MAX_BATCH_FRAMES
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF_MS,
            max_batch_frames: DEFAULT_MAX_BATCH_FRAMES,
        }
    }
}

// ==================== Message Sink Tuning ====================

/// Background publisher tunables shared by every message sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSinkTuning {
    #[serde(default = "default_sink_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_publish_attempts")]
    pub max_publish_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
}

fn default_sink_queue_capacity() -> usize {
    DEFAULT_SINK_QUEUE_CAPACITY
}

fn default_max_publish_attempts() -> u32 {
    DEFAULT_MAX_PUBLISH_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_report_capacity() -> usize {
    DEFAULT_REPORT_CAPACITY
}

impl Default for MessageSinkTuning {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            max_publish_attempts: DEFAULT_MAX_PUBLISH_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            report_capacity: DEFAULT_REPORT_CAPACITY,
        }
    }
}

// ==================== Logging Config ====================

/// Logging setup consumed by [`crate::logging::init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Optional directory for a daily-rolling log file
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// File name prefix inside `directory`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_filter() -> String {
    "info,odeflow=debug".to_string()
}

fn default_file_prefix() -> String {
    "odeflow.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}
