pub mod bridge;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod mixer;
pub mod pcm;
pub mod provider;
pub mod registry;
pub mod ring_buffer;

pub use bridge::{AudioBridge, BridgeStats, EngineState};
pub use config::EngineConfig;
pub use engine::AudioEngine;
pub use error::{AddDeviceError, ConfigError, EngineError, PcmError};
pub use events::EngineEvent;
pub use mixer::Mixer;
pub use provider::{CpalStreamProvider, ManualStreamHandle, ManualStreamProvider, StreamProvider};
pub use registry::{DeviceId, DeviceRegistry, MAX_DEVICES};
pub use ring_buffer::SampleRingBuffer;
