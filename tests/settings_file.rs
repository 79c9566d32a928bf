//! Integration tests for argument and settings-file resolution.
//!
//! Tests cover precedence between the command line and `settings.json`,
//! and rejection of unusable test-pattern settings.

use std::path::PathBuf;

use clap::Parser;
use gnome_v4l2_lib::cli::Cli;
use gnome_v4l2_lib::core::config::{load_settings_from_file, Mode, RunConfig};
use gnome_v4l2_lib::errors::{BridgeError, ConfigError};
use gnome_v4l2_lib::pipeline::Geometry;

fn write_settings(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn test_file_supplies_defaults_for_color_bars() {
    let (_dir, path) = write_settings(
        r#"{
            "device": "/dev/video20",
            "color_bars_width": 1920,
            "color_bars_height": 1080,
            "color_bars_fps": 25
        }"#,
    );
    let settings = load_settings_from_file(&path).unwrap();
    let cli = Cli::try_parse_from(["gnome-v4l2", "--color-bars"]).unwrap();

    let config = RunConfig::resolve(&cli, &settings, false).unwrap();
    assert_eq!(config.device, PathBuf::from("/dev/video20"));
    assert_eq!(
        config.mode,
        Mode::ColorBars {
            geometry: Geometry::new(1920, 1080),
            fps: 25
        }
    );
    assert!(!config.debug);
}

#[test]
fn test_positional_device_overrides_file() {
    let (_dir, path) = write_settings(r#"{ "device": "/dev/video20" }"#);
    let settings = load_settings_from_file(&path).unwrap();
    let cli = Cli::try_parse_from(["gnome-v4l2", "-v", "/dev/video3"]).unwrap();

    let config = RunConfig::resolve(&cli, &settings, false).unwrap();
    assert_eq!(config.device, PathBuf::from("/dev/video3"));
    assert_eq!(config.mode, Mode::Bridge);
    assert!(config.debug);
}

#[test]
fn test_invalid_fps_is_a_usage_error() {
    let (_dir, path) = write_settings(r#"{ "color_bars_fps": 0 }"#);
    let settings = load_settings_from_file(&path).unwrap();
    let cli = Cli::try_parse_from(["gnome-v4l2"]).unwrap();

    let err = RunConfig::resolve(&cli, &settings, false).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert_eq!(BridgeError::from(err).exit_code(), 1);
}

#[test]
fn test_wrong_types_fail_to_parse() {
    let (_dir, path) = write_settings(r#"{ "color_bars_width": "wide" }"#);
    assert!(matches!(load_settings_from_file(&path), Err(ConfigError::Parse(_))));
}
