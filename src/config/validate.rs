// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile, TransferSection, UploaderOptions};
use crate::errors::{DropshipError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::DropshipError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let uploader = validate_options(raw.uploader)?;
        if let Some(transfer) = &raw.transfer {
            validate_transfer(transfer)?;
        }
        Ok(ConfigFile::new_unchecked(uploader, raw.transfer))
    }
}

/// Check option ranges and return the options with a normalised extension
/// allowlist (lower case, no leading dot).
pub fn validate_options(mut options: UploaderOptions) -> Result<UploaderOptions> {
    if options.concurrency == 0 {
        return Err(DropshipError::ConfigError(
            "[uploader].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if options.save_interval == 0 {
        return Err(DropshipError::ConfigError(
            "[uploader].save_interval must be > 0 ms".to_string(),
        ));
    }
    if options.modify_interval == 0 {
        return Err(DropshipError::ConfigError(
            "[uploader].modify_interval must be > 0 ms".to_string(),
        ));
    }
    validate_name(&options.name)?;

    if let Some(extensions) = options.extensions.take() {
        options.extensions = Some(normalize_extensions(extensions));
    }

    Ok(options)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DropshipError::ConfigError(
            "[uploader].name must not be empty".to_string(),
        ));
    }
    if name.contains(['/', '\\']) {
        return Err(DropshipError::ConfigError(format!(
            "[uploader].name '{}' must not contain path separators",
            name
        )));
    }
    Ok(())
}

fn validate_transfer(transfer: &TransferSection) -> Result<()> {
    if transfer.cmd.trim().is_empty() {
        return Err(DropshipError::ConfigError(
            "[transfer].cmd must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = extensions
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
