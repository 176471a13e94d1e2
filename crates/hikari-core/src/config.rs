//! Controller configuration
//!
//! All sections deserialize from JSON with defaults for missing fields, so a
//! host only has to spell out what it overrides.

use crate::{error::Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Top-level player configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub transport: TransportConfig,
    pub controls: ControlConfig,
    pub telemetry: TelemetryConfig,
}

/// Settings for the segmented-streaming transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Probe and demux segments on the blocking worker pool
    pub enable_worker: bool,
    /// Poll a full forward buffer at a short interval
    pub low_latency_mode: bool,
    /// Seconds of already-played media kept behind the playhead
    pub back_buffer_length: f64,
    /// Forward buffer target in seconds
    pub max_buffer_length: f64,
    /// Hard ceiling for the forward buffer target in seconds
    pub max_max_buffer_length: f64,
    /// Initial rendition index (manifest order); `None` picks the first
    pub start_level: Option<usize>,
    /// Use native playback even when software demuxing is available
    pub prefer_native: bool,
    /// Timeout for manifest and segment requests in milliseconds
    pub request_timeout_ms: u64,
    /// Share of the throughput estimate a rendition may use in auto mode
    pub abr_safety_factor: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enable_worker: true,
            low_latency_mode: true,
            back_buffer_length: 90.0,
            max_buffer_length: 30.0,
            max_max_buffer_length: 600.0,
            start_level: None,
            prefer_native: false,
            request_timeout_ms: 10_000,
            abr_safety_factor: 0.8,
        }
    }
}

impl TransportConfig {
    /// How long the loader waits before re-checking a full forward buffer
    pub fn buffer_poll_interval(&self) -> Duration {
        if self.low_latency_mode {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(250)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Settings for the playback control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub initial_volume: f64,
    /// Seek distance for the arrow keys, in seconds
    pub seek_step: f64,
    /// Volume change for the arrow keys
    pub volume_step: f64,
    pub autoplay: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            initial_volume: 0.7,
            seek_step: 10.0,
            volume_step: 0.1,
            autoplay: false,
        }
    }
}

/// Settings for watch-progress telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Elapsed playback time after which a view is counted
    pub view_threshold_secs: f64,
    /// Catalog API base URL for the view-count endpoint
    pub api_base_url: Option<Url>,
    pub request_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            view_threshold_secs: 30.0,
            api_base_url: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl PlayerConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        if t.back_buffer_length <= 0.0 {
            return Err(Error::InvalidConfig("back_buffer_length must be positive".into()));
        }
        if t.max_buffer_length <= 0.0 {
            return Err(Error::InvalidConfig("max_buffer_length must be positive".into()));
        }
        if t.max_buffer_length > t.max_max_buffer_length {
            return Err(Error::InvalidConfig(format!(
                "max_buffer_length ({}) exceeds max_max_buffer_length ({})",
                t.max_buffer_length, t.max_max_buffer_length
            )));
        }
        if !(t.abr_safety_factor > 0.0 && t.abr_safety_factor <= 1.0) {
            return Err(Error::InvalidConfig("abr_safety_factor must be in (0, 1]".into()));
        }

        let c = &self.controls;
        if !(0.0..=1.0).contains(&c.initial_volume) {
            return Err(Error::InvalidConfig("initial_volume must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&c.volume_step) {
            return Err(Error::InvalidConfig("volume_step must be in [0, 1]".into()));
        }
        if c.seek_step <= 0.0 {
            return Err(Error::InvalidConfig("seek_step must be positive".into()));
        }

        if self.telemetry.view_threshold_secs < 0.0 {
            return Err(Error::InvalidConfig("view_threshold_secs must not be negative".into()));
        }

        Ok(())
    }
}
