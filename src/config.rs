//! Configuration management for flatcryptfs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default plaintext size ceiling: 256MB
///
/// Every read and write transcodes the whole file, so this bounds the work
/// a single call can do.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Environment variable overriding the key record location
pub const ENV_KEY_FILE: &str = "FLATCRYPTFS_KEY_FILE";

/// Environment variable overriding the log file
pub const ENV_LOG_FILE: &str = "FLATCRYPTFS_LOG_FILE";

/// Environment variable toggling audit records
pub const ENV_AUDIT: &str = "FLATCRYPTFS_AUDIT";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of the durable key record
    pub key_file: PathBuf,

    /// Mount configuration
    pub mount: MountConfig,

    /// Synthetic capacity figures reported by statfs
    pub statfs: StatfsConfig,

    /// Content limits
    pub content: ContentConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table
    pub fs_name: String,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,

    /// Unmount automatically when the process exits
    pub auto_unmount: bool,
}

/// Figures returned from statfs. Nothing is measured; the store is in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatfsConfig {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}

/// Content configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Largest plaintext a file may grow to, in bytes
    pub max_file_size: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (appended to); stderr when unset
    pub file: Option<PathBuf>,

    /// Emit one record per operation with verb, path and byte counts.
    /// File content is never logged.
    pub audit: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flatcryptfs");

        Config {
            key_file: data_dir.join("key.json"),
            mount: MountConfig::default(),
            statfs: StatfsConfig::default(),
            content: ContentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            fs_name: "flatcryptfs".to_string(),
            allow_other: false,
            allow_root: false,
            auto_unmount: true,
        }
    }
}

impl Default for StatfsConfig {
    fn default() -> Self {
        StatfsConfig {
            block_size: 512,
            blocks: 4096,
            blocks_free: 2048,
            blocks_available: 2048,
            files: 4096,
            files_free: 2048,
            name_max: 255,
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        ContentConfig {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            audit: false,
        }
    }
}

impl Config {
    /// Default config file location (~/.config/flatcryptfs/config.json)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flatcryptfs")
            .join("config.json")
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key_file) = std::env::var(ENV_KEY_FILE) {
            let key_file = key_file.trim();
            if !key_file.is_empty() {
                self.key_file = PathBuf::from(key_file);
            }
        }

        if let Ok(log_file) = std::env::var(ENV_LOG_FILE) {
            let log_file = log_file.trim();
            if !log_file.is_empty() {
                self.logging.file = Some(PathBuf::from(log_file));
            }
        }

        if let Ok(audit) = std::env::var(ENV_AUDIT) {
            self.logging.audit = matches!(
                audit.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.key_file.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("key_file must not be empty".to_string()));
        }

        if self.mount.fs_name.is_empty() {
            return Err(Error::InvalidConfig(
                "mount.fs_name must not be empty".to_string(),
            ));
        }

        if self.statfs.block_size == 0 {
            return Err(Error::InvalidConfig(
                "statfs.block_size must be non-zero".to_string(),
            ));
        }

        if self.statfs.blocks_free > self.statfs.blocks
            || self.statfs.blocks_available > self.statfs.blocks
        {
            return Err(Error::InvalidConfig(
                "statfs free/available blocks exceed total blocks".to_string(),
            ));
        }

        if self.content.max_file_size == 0 {
            return Err(Error::InvalidConfig(
                "content.max_file_size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
