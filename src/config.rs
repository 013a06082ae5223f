//! Client configuration, stored as JSON.

use crate::memory::{LayoutBlock, ValidationPolicy};
use crate::transport::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config files larger than this are rejected unread
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file too large: {0} bytes")]
    TooLarge(u64),
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    /// Retries per chunk before a transfer fails
    pub max_retries: u32,
    /// Status polling interval of pause loops and the breakpoint waiter
    pub poll_interval_ms: u64,
    /// Where the target stub saves the register context on a breakpoint
    pub context_address: u32,
    /// Parent directory of search history sessions
    pub history_dir: PathBuf,
    pub validation: ValidationPolicy,
    /// Kernel addresses of the segment bounds, per OS version
    pub layout_blocks: Vec<LayoutBlock>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 2000,
            io_timeout_ms: 1000,
            max_retries: 3,
            poll_interval_ms: 100,
            context_address: 0,
            history_dir: std::env::temp_dir().join("geckolink"),
            validation: ValidationPolicy::Strict,
            layout_blocks: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge(size));
        }
        let mut content = String::new();
        file.take(MAX_CONFIG_SIZE).read_to_string(&mut content)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load `path`, falling back to the defaults when it is missing or broken.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
