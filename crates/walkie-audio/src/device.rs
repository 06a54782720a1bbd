use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::EngineError;

/// Whether to search for an input or output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Input,
    Output,
}

impl DeviceDirection {
    fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// A hardware endpoint as reported by the host audio API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareDevice {
    pub name: String,
    pub is_default: bool,
}

/// Enumerated hardware devices (input and output).
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnumeratedDevices {
    pub input_devices: Vec<HardwareDevice>,
    pub output_devices: Vec<HardwareDevice>,
}

/// Enumerate all available audio input and output devices on the default host.
pub fn enumerate_hardware() -> EnumeratedDevices {
    let host = cpal::default_host();
    EnumeratedDevices {
        input_devices: list(&host, DeviceDirection::Input),
        output_devices: list(&host, DeviceDirection::Output),
    }
}

fn list(host: &cpal::Host, direction: DeviceDirection) -> Vec<HardwareDevice> {
    let (default, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device(),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device(),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };
    let default_name = default.and_then(|d| d.name().ok());

    devices
        .into_iter()
        .flatten()
        .filter_map(|device| device.name().ok())
        .map(|name| HardwareDevice {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect()
}

/// Find an audio device by name, falling back to the default for that direction.
pub fn find_device(
    host: &cpal::Host,
    name: &str,
    direction: &DeviceDirection,
) -> Result<cpal::Device, EngineError> {
    let is_input = matches!(direction, DeviceDirection::Input);
    let label = direction.label();

    let devices: Vec<cpal::Device> = if is_input {
        host.input_devices().into_iter().flatten().collect()
    } else {
        host.output_devices().into_iter().flatten().collect()
    };

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    tracing::warn!(device = %name, direction = label, "requested device not found, falling back to default");
    let default = if is_input {
        host.default_input_device()
    } else {
        host.default_output_device()
    };
    default.ok_or_else(|| EngineError::AudioDevice(format!("no {label} device available")))
}
