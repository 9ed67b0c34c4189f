//! Runtime configuration loaded from an optional YAML file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Online meeting tools usually reject anything above 720p.
pub const MAX_WIDTH: u32 = 1280;
pub const MAX_HEIGHT: u32 = 720;

/// Bus-info marker reported by the v4l2loopback driver.
pub const LOOPBACK_MARKER: &str = "platform:v4l2loopback";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Target frame rate of the virtual camera.
    pub fps: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub loopback_marker: String,
    /// Prefix used in suggested v4l2loopback card labels.
    pub virtual_label_prefix: String,
    /// Keyboard event devices to watch. Empty means every readable keyboard.
    pub keyboards: Vec<PathBuf>,
    pub frame_timeout_ms: u64,
    pub stall_timeout_ms: u64,
    /// Initial value overrides, keyed by flag name.
    pub flags: BTreeMap<String, bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fps: 24,
            max_width: MAX_WIDTH,
            max_height: MAX_HEIGHT,
            loopback_marker: LOOPBACK_MARKER.to_string(),
            virtual_label_prefix: "MeetingCam".to_string(),
            keyboards: Vec::new(),
            frame_timeout_ms: 100,
            stall_timeout_ms: 5000,
            flags: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load the config file if one was given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        info!("Loading config from {:?}", path);
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        anyhow::ensure!(config.fps > 0, "fps must be greater than zero");
        anyhow::ensure!(
            config.max_width > 0 && config.max_height > 0,
            "max_width and max_height must be greater than zero"
        );
        Ok(config)
    }

    pub fn ceiling(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}
