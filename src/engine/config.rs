//! Output configuration.
//!
//! [`OutputSettings`] is the static, file-loadable form. [`OutputConfig`] is
//! the live copy shared with the render thread; every field is an atomic so a
//! render step never reads a half-written value.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::engine::error::{OutputError, Result};

pub const DEFAULT_BUFFER_DURATION: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub mute: bool,
    pub volume: f32,
    /// Hardware buffer length; larger values trade latency for underrun safety.
    pub buffer_duration_ms: u64,
    /// Output device name. `None` follows the system default.
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            mute: false,
            volume: 1.0,
            buffer_duration_ms: DEFAULT_BUFFER_DURATION.as_millis() as u64,
            device: None,
            sample_rate: None,
            channels: None,
        }
    }
}

impl OutputSettings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| OutputError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OutputError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(self.buffer_duration_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(OutputError::Config(format!(
                "volume {} outside 0.0..=1.0",
                self.volume
            )));
        }
        if self.buffer_duration_ms == 0 {
            return Err(OutputError::Config("buffer_duration_ms must be > 0".into()));
        }
        if self.channels == Some(0) || self.sample_rate == Some(0) {
            return Err(OutputError::Config(
                "sample_rate and channels must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Live mute/volume/buffer settings.
pub struct OutputConfig {
    mute: AtomicBool,
    /// f32 bit pattern.
    volume: AtomicU32,
    buffer_duration_us: AtomicU64,
}

impl OutputConfig {
    pub fn new() -> Self {
        Self {
            mute: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
            buffer_duration_us: AtomicU64::new(DEFAULT_BUFFER_DURATION.as_micros() as u64),
        }
    }

    pub fn from_settings(settings: &OutputSettings) -> Self {
        let config = Self::new();
        config.set_mute(settings.mute);
        config.set_volume(settings.volume);
        config.set_buffer_duration(settings.buffer_duration());
        config
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }

    /// Clamps to `0.0..=1.0`. NaN is ignored.
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            warn!("Ignoring NaN volume");
            return;
        }
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_micros(self.buffer_duration_us.load(Ordering::Acquire))
    }

    /// Takes effect on the next open.
    pub fn set_buffer_duration(&self, duration: Duration) {
        let micros = duration.as_micros().clamp(1, u64::MAX as u128) as u64;
        self.buffer_duration_us.store(micros, Ordering::Release);
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::new()
    }
}
