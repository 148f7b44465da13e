// tests/config_loading.rs

use std::io::Write;
use std::path::PathBuf;

use dropship::config::{load_and_validate, load_from_path};
use dropship::errors::DropshipError;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn full_config_file_is_loaded() {
    let file = write_config(
        r#"
[uploader]
concurrency = 4
retries = 2
throttle = 262144
extensions = [".JPG", "png", "jpg"]
modify_interval = 2000
name = "photos"
config_path = "/var/lib/dropship"
paths = ["/home/me/Pictures"]

[transfer]
cmd = "cat > /dev/null"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.uploader.concurrency, 4);
    assert_eq!(cfg.uploader.retries, 2);
    assert_eq!(cfg.uploader.throttle, 262_144);
    assert_eq!(
        cfg.uploader.extensions,
        Some(vec!["jpg".to_string(), "png".to_string()])
    );
    assert_eq!(cfg.uploader.paths, vec![PathBuf::from("/home/me/Pictures")]);
    assert_eq!(
        cfg.uploader.state_file_path(),
        PathBuf::from("/var/lib/dropship/.photos.json")
    );
    assert_eq!(cfg.transfer.unwrap().cmd, "cat > /dev/null");
}

#[test]
fn empty_file_uses_defaults() {
    let file = write_config("");
    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.uploader.concurrency, 2);
    assert_eq!(cfg.uploader.save_interval, 10_000);
    assert_eq!(cfg.uploader.modify_interval, 5_000);
    assert_eq!(cfg.uploader.retries, 0);
    assert!(cfg.uploader.extensions.is_none());
    assert!(cfg.transfer.is_none());
}

#[test]
fn zero_concurrency_is_rejected() {
    let file = write_config("[uploader]\nconcurrency = 0\n");
    match load_and_validate(file.path()) {
        Err(DropshipError::ConfigError(msg)) => assert!(msg.contains("concurrency")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn blank_transfer_command_is_rejected() {
    let file = write_config("[transfer]\ncmd = \"   \"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(DropshipError::ConfigError(_))
    ));
}

#[test]
fn invalid_toml_is_a_toml_error() {
    let file = write_config("[uploader\nconcurrency = 1");
    assert!(matches!(
        load_from_path(file.path()),
        Err(DropshipError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(matches!(
        load_from_path("/definitely/not/here/Dropship.toml"),
        Err(DropshipError::IoError(_))
    ));
}
