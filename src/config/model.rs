// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAME: &str = "dropship";

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [uploader]
/// concurrency = 2
/// extensions = ["jpg", "png"]
/// retries = 2
/// throttle = 262144
/// paths = ["/home/me/Pictures"]
///
/// [transfer]
/// cmd = "curl -sf -T - https://example.invalid/upload/$(basename \"$DROPSHIP_PATH\")"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub uploader: UploaderOptions,

    #[serde(default)]
    pub transfer: Option<TransferSection>,
}

/// Validated configuration. Build it via `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub uploader: UploaderOptions,
    pub transfer: Option<TransferSection>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        uploader: UploaderOptions,
        transfer: Option<TransferSection>,
    ) -> Self {
        Self { uploader, transfer }
    }
}

/// `[transfer]` section: the shell command run once per transfer attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferSection {
    pub cmd: String,
}

/// Construction-time options for an `Uploader`.
///
/// Intervals are in milliseconds, `throttle` in bytes per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderOptions {
    /// Maximum number of uploads in flight.
    pub concurrency: usize,

    /// Debounce window for state persistence.
    pub save_interval: u64,

    /// State file stem; the file is `.<name>.json`.
    pub name: String,

    /// Directory holding the state file. `None` means the working directory.
    pub config_path: Option<PathBuf>,

    /// Shared byte-per-second budget; 0 disables throttling.
    pub throttle: u64,

    /// Lower-case suffix allowlist; `None` allows everything.
    pub extensions: Option<Vec<String>>,

    /// Extra attempts after the first failed transfer.
    pub retries: u32,

    /// Period between size samples while waiting for a write to settle.
    pub modify_interval: u64,

    /// Roots to watch in addition to the persisted ones.
    pub paths: Vec<PathBuf>,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            save_interval: 10_000,
            name: DEFAULT_NAME.to_string(),
            config_path: None,
            throttle: 0,
            extensions: None,
            retries: 0,
            modify_interval: 5_000,
            paths: Vec::new(),
        }
    }
}

impl UploaderOptions {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval)
    }

    pub fn modify_interval(&self) -> Duration {
        Duration::from_millis(self.modify_interval)
    }

    /// Location of the persisted state document.
    pub fn state_file_path(&self) -> PathBuf {
        let file_name = format!(".{}.json", self.name);
        match &self.config_path {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}
