use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("failed to open audio stream: {0}")]
    StreamOpen(String),

    #[error("failed to start audio stream: {0}")]
    StreamStart(String),

    #[error("engine is {0}, expected stopped")]
    InvalidState(crate::bridge::EngineState),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PcmError {
    #[error("PCM payload has odd length {0}; expected whole 16-bit frames")]
    OddLength(usize),
}

/// Why the registry refused a new device.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddDeviceError {
    #[error("device is already registered")]
    AlreadyPresent,

    #[error("registry is full ({0} devices)")]
    RegistryFull(usize),
}
