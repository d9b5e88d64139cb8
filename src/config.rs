use crate::decoder::CodecDescriptor;
use crate::display::SlotConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Frames the recorder may queue before new ones get dropped.
pub const DEFAULT_RECORD_QUEUE: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Replace unconsumed frames instead of waiting for the renderer
    pub skip_frames: bool,
    /// Dump every decoded frame to this file
    pub record_path: Option<PathBuf>,
    pub record_queue: usize,
    /// Log the render rate once per second
    pub log_fps: bool,
    /// Private decoder options, e.g. `{"threads": "4"}`
    pub codec_options: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            skip_frames: true,
            record_path: None,
            record_queue: DEFAULT_RECORD_QUEUE,
            log_fps: true,
            codec_options: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn slot_config(&self) -> SlotConfig {
        SlotConfig {
            skip_frames: self.skip_frames,
        }
    }

    /// Add the configured decoder options to what the source probed.
    pub fn apply_codec_options(&self, descriptor: &CodecDescriptor) -> CodecDescriptor {
        self.codec_options
            .iter()
            .fold(descriptor.clone(), |descriptor, (name, value)| {
                descriptor.with_option(name, value)
            })
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
