//! Persistent defaults and the resolved run configuration.
//!
//! `settings.json` in the data directory may provide defaults for the
//! device and the test pattern. Command-line values always win.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::errors::ConfigError;
use crate::pipeline::Geometry;
use crate::shared::paths::{ensure_dir, get_settings_path};

pub const DEFAULT_DEVICE: &str = "/dev/video0";
pub const DEFAULT_COLOR_BARS_WIDTH: u32 = 1280;
pub const DEFAULT_COLOR_BARS_HEIGHT: u32 = 720;
pub const DEFAULT_COLOR_BARS_FPS: u32 = 30;

const MAX_DIMENSION: u32 = 8192;
const MAX_FPS: u32 = 240;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub device: PathBuf,
    pub color_bars_width: u32,
    pub color_bars_height: u32,
    pub color_bars_fps: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            color_bars_width: DEFAULT_COLOR_BARS_WIDTH,
            color_bars_height: DEFAULT_COLOR_BARS_HEIGHT,
            color_bars_fps: DEFAULT_COLOR_BARS_FPS,
        }
    }
}

impl BridgeSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("device path is empty".to_string()));
        }
        for (name, value) in [
            ("color_bars_width", self.color_bars_width),
            ("color_bars_height", self.color_bars_height),
        ] {
            if value == 0 || value > MAX_DIMENSION {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_DIMENSION, value
                )));
            }
        }
        if self.color_bars_fps == 0 || self.color_bars_fps > MAX_FPS {
            return Err(ConfigError::Invalid(format!(
                "color_bars_fps must be between 1 and {}, got {}",
                MAX_FPS, self.color_bars_fps
            )));
        }
        Ok(())
    }
}

/// Loads `settings.json` from the data directory, falling back to the
/// defaults when the file is missing or unreadable.
pub fn load_settings() -> BridgeSettings {
    let path = get_settings_path();

    if !path.exists() {
        return BridgeSettings::default();
    }

    match load_settings_from_file(&path) {
        Ok(settings) => {
            tracing::debug!(target: "system", "Settings loaded from {:?}", path);
            settings
        }
        Err(e) => {
            tracing::warn!(target: "system", "Ignoring settings file {:?}: {}", path, e);
            BridgeSettings::default()
        }
    }
}

pub fn load_settings_from_file(path: &Path) -> Result<BridgeSettings, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

pub fn save_settings_to_file(settings: &BridgeSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Portal screencast into the sink.
    Bridge,
    /// Built-in test pattern; no portal, no PipeWire.
    ColorBars { geometry: Geometry, fps: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub device: PathBuf,
    pub mode: Mode,
    pub debug: bool,
}

impl RunConfig {
    /// Merges parsed arguments over file settings. `env_debug` carries the
    /// debug environment variables.
    pub fn resolve(
        cli: &Cli,
        settings: &BridgeSettings,
        env_debug: bool,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let device = cli
            .device
            .clone()
            .unwrap_or_else(|| settings.device.clone());
        if device.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("device path is empty".to_string()));
        }

        let mode = if cli.color_bars {
            Mode::ColorBars {
                geometry: Geometry::new(settings.color_bars_width, settings.color_bars_height),
                fps: settings.color_bars_fps,
            }
        } else {
            Mode::Bridge
        };

        Ok(Self {
            device,
            mode,
            debug: cli.debug || env_debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(device: Option<&str>, color_bars: bool, debug: bool) -> Cli {
        Cli {
            device: device.map(PathBuf::from),
            color_bars,
            debug,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = BridgeSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.device, PathBuf::from("/dev/video0"));
    }

    #[test]
    fn test_cli_device_wins_over_file() {
        let settings = BridgeSettings {
            device: PathBuf::from("/dev/video4"),
            ..Default::default()
        };

        let config = RunConfig::resolve(&cli(Some("/dev/video9"), false, false), &settings, false).unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/video9"));

        let config = RunConfig::resolve(&cli(None, false, false), &settings, false).unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/video4"));
    }

    #[test]
    fn test_color_bars_mode_uses_settings_geometry() {
        let settings = BridgeSettings {
            color_bars_width: 640,
            color_bars_height: 480,
            color_bars_fps: 15,
            ..Default::default()
        };

        let config = RunConfig::resolve(&cli(None, true, false), &settings, false).unwrap();
        assert_eq!(
            config.mode,
            Mode::ColorBars {
                geometry: Geometry::new(640, 480),
                fps: 15
            }
        );
    }

    #[test]
    fn test_env_debug_enables_debug() {
        let config =
            RunConfig::resolve(&cli(None, false, false), &BridgeSettings::default(), true).unwrap();
        assert!(config.debug);
    }

    #[test]
    fn test_zero_dimension_is_invalid() {
        let settings = BridgeSettings {
            color_bars_width: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{ "device": "/dev/video7" }"#).unwrap();

        let settings = load_settings_from_file(&path).unwrap();
        assert_eq!(settings.device, PathBuf::from("/dev/video7"));
        assert_eq!(settings.color_bars_width, DEFAULT_COLOR_BARS_WIDTH);
        assert_eq!(settings.color_bars_fps, DEFAULT_COLOR_BARS_FPS);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");
        let settings = BridgeSettings {
            color_bars_fps: 60,
            ..Default::default()
        };

        save_settings_to_file(&settings, &path).unwrap();
        assert_eq!(load_settings_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_settings_from_file(&path), Err(ConfigError::Parse(_))));
    }
}
