//! Hardware stream abstraction.
//!
//! The bridge never talks to an audio API directly: it hands a
//! [`StreamProvider`] the callbacks to run and the provider decides when they
//! run. [`CpalStreamProvider`] drives them from real devices;
//! [`ManualStreamProvider`] lets tests and simulations drive them by hand.

pub mod hardware;
pub mod manual;

pub use self::hardware::CpalStreamProvider;
pub use self::manual::{ManualStreamHandle, ManualStreamProvider};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Called with each block of captured microphone frames.
pub type CaptureCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;
/// Called to fill each block of playback frames.
pub type PlaybackCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;
/// Called when a stream reports an asynchronous error (e.g. device unplugged).
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Fixed stream parameters. Always mono signed 16-bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub frames_per_callback: u32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl From<&EngineConfig> for StreamConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frames_per_callback: config.frames_per_callback,
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }
}

/// Everything the provider runs on the audio thread(s).
pub struct StreamCallbacks {
    pub capture: CaptureCallback,
    pub playback: PlaybackCallback,
    pub error: ErrorCallback,
}

/// Opens, starts and stops a paired capture + playback stream.
///
/// `open` may only prepare; `start` makes the callbacks live. If `start`
/// fails, neither stream may be left running. `stop` must be idempotent and
/// must not return until the callbacks will no longer be invoked.
pub trait StreamProvider: Send {
    fn open(&mut self, config: &StreamConfig, callbacks: StreamCallbacks) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self);
}
