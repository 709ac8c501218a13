//! Configuration persistence
//!
//! The store owns the on-disk location of `config.json`. It is loaded once
//! at startup and flushed exactly once by the shutdown handler; nothing else
//! writes the file while the daemon runs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BridgeError, Result};

use super::Config;

/// File name of the configuration document, resolved next to the executable.
const CONFIG_FILE_NAME: &str = "config.json";

/// Handle on the persistent configuration file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store for an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve `config.json` in the directory containing the running
    /// executable.
    pub fn at_executable() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| BridgeError::Config(format!("Cannot locate executable: {}", e)))?;
        let dir = exe.parent().ok_or_else(|| {
            BridgeError::Config("Executable path has no parent directory".to_string())
        })?;
        Ok(Self::new(dir.join(CONFIG_FILE_NAME)))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the configuration. Any failure here is startup-fatal
    /// for the daemon; there is no default-creation fallback.
    pub fn load(&self) -> Result<Config> {
        info!("Loading configuration from: {}", self.path.display());

        let content = fs::read_to_string(&self.path).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        Config::from_json(&content)
    }

    /// Overwrite the file wholesale with the current configuration: all
    /// keys, alphabetically ordered, 4-space indented. Written to a temp
    /// file first, then renamed into place.
    pub fn flush(&self, config: &Config) -> Result<()> {
        let content = config.to_json()?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .map_err(|e| BridgeError::Config(format!("Failed to write temp file: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| BridgeError::Config(format!("Failed to rename temp file: {}", e)))?;

        debug!("Flushed configuration to {}", self.path.display());
        Ok(())
    }
}
