use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pcm;
use crate::registry::{DeviceId, MAX_DEVICES};

/// Largest accepted hardware block.
pub const MAX_FRAMES_PER_CALLBACK: u32 = 8192;
/// Accepted range of callback periods held by each device ring.
pub const BUFFER_PERIODS: std::ops::RangeInclusive<u32> = 2..=16;
/// Largest capture or playback queue: ten seconds at the highest rate.
pub const MAX_QUEUE_FRAMES: usize = 1_920_000;

/// Configuration for the audio engine.
///
/// Every field has a default, so a config file only needs to name what it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hardware stream sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per hardware callback (480 = 10ms at 48kHz).
    pub frames_per_callback: u32,
    /// Callback periods each device ring holds; absorbs network jitter.
    pub buffer_periods: u32,
    /// Upper bound on simultaneously active devices.
    pub max_devices: usize,
    /// Device id the local microphone and speaker are bound to.
    pub local_device_id: DeviceId,
    /// Samples of locally captured audio held for `capture()` callers.
    pub capture_queue_frames: usize,
    /// Samples of `play()` audio held ahead of the playback callback.
    pub playback_queue_frames: usize,
    /// Pending engine events before new ones are dropped.
    pub event_queue_capacity: usize,
    /// Selected input device name (None = system default).
    pub input_device: Option<String>,
    /// Selected output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frames_per_callback: 480,
            buffer_periods: 8,
            max_devices: MAX_DEVICES,
            local_device_id: DeviceId::new(0),
            capture_queue_frames: pcm::frames_for(1000, 48000),
            playback_queue_frames: pcm::frames_for(1000, 48000),
            event_queue_capacity: 64,
            input_device: None,
            output_device: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "engine config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if !(1..=MAX_FRAMES_PER_CALLBACK).contains(&self.frames_per_callback) {
            return Err(ConfigError::Invalid(format!(
                "frames_per_callback {} outside 1..={MAX_FRAMES_PER_CALLBACK}",
                self.frames_per_callback
            )));
        }
        if !BUFFER_PERIODS.contains(&self.buffer_periods) {
            return Err(ConfigError::Invalid(format!(
                "buffer_periods {} outside {}..={}",
                self.buffer_periods,
                BUFFER_PERIODS.start(),
                BUFFER_PERIODS.end()
            )));
        }
        if !(1..=64).contains(&self.max_devices) {
            return Err(ConfigError::Invalid(format!(
                "max_devices {} outside 1..=64",
                self.max_devices
            )));
        }
        if self.capture_queue_frames == 0
            || self.playback_queue_frames == 0
            || self.event_queue_capacity == 0
        {
            return Err(ConfigError::Invalid("queue sizes must be non-zero".into()));
        }
        if self.capture_queue_frames > MAX_QUEUE_FRAMES || self.playback_queue_frames > MAX_QUEUE_FRAMES {
            return Err(ConfigError::Invalid(format!(
                "capture/playback queues are limited to {MAX_QUEUE_FRAMES} frames"
            )));
        }
        Ok(())
    }

    /// Per-device ring capacity: `frames_per_callback * buffer_periods`,
    /// rounded up to a power of two.
    ///
    /// Both factors are clamped to their accepted ranges, so an unvalidated
    /// config still yields a bounded size.
    pub fn ring_capacity(&self) -> usize {
        let frames = self.frames_per_callback.clamp(1, MAX_FRAMES_PER_CALLBACK) as usize;
        let periods = self
            .buffer_periods
            .clamp(*BUFFER_PERIODS.start(), *BUFFER_PERIODS.end()) as usize;
        frames
            .checked_mul(periods)
            .and_then(usize::checked_next_power_of_two)
            .unwrap_or(MAX_FRAMES_PER_CALLBACK as usize * *BUFFER_PERIODS.end() as usize)
    }

    /// Duration of one callback period in milliseconds.
    pub fn callback_period_ms(&self) -> f64 {
        f64::from(self.frames_per_callback) * 1000.0 / f64::from(self.sample_rate)
    }
}
