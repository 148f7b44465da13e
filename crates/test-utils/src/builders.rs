#![allow(dead_code)]

use std::path::PathBuf;

use dropship::config::UploaderOptions;

/// Builder for `UploaderOptions` with test-friendly timings.
///
/// Defaults differ from production: 100 ms settle polling, a 1 s save
/// window and the state file under `/state`, so mock-filesystem tests
/// finish quickly under paused time.
pub struct OptionsBuilder {
    options: UploaderOptions,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: UploaderOptions {
                save_interval: 1_000,
                modify_interval: 100,
                config_path: Some(PathBuf::from("/state")),
                ..UploaderOptions::default()
            },
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.options.concurrency = n;
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.options.retries = n;
        self
    }

    pub fn extensions(mut self, exts: &[&str]) -> Self {
        self.options.extensions = Some(exts.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn throttle(mut self, bytes_per_sec: u64) -> Self {
        self.options.throttle = bytes_per_sec;
        self
    }

    pub fn save_interval_ms(mut self, ms: u64) -> Self {
        self.options.save_interval = ms;
        self
    }

    pub fn modify_interval_ms(mut self, ms: u64) -> Self {
        self.options.modify_interval = ms;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.options.name = name.to_string();
        self
    }

    pub fn config_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(dir.into());
        self
    }

    pub fn watch(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.paths.push(path.into());
        self
    }

    pub fn build(self) -> UploaderOptions {
        self.options
    }

    /// Where the uploader built from these options keeps its state.
    pub fn state_file(&self) -> PathBuf {
        self.options.state_file_path()
    }
}
