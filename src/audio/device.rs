//! Audio device enumeration and lookup
//!
//! Devices are addressed by index within their direction's list, as returned
//! by the host. `None` selects the host default.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::constants::DEFAULT_DEVICE_SAMPLE_RATE;
use crate::error::AudioError;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Device summary for front ends
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    /// Native (default config) sample rate
    pub sample_rate: u32,
    pub channels: u16,
}

/// Wrapper around a cpal device with its native configuration
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub config: cpal::SupportedStreamConfig,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device, direction: Direction) -> Result<Self, AudioError> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = match direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        }
        .map_err(|e| AudioError::DeviceNotFound(format!("{}: {}", name, e)))?;

        Ok(Self {
            inner: device,
            name,
            config,
        })
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for (index, device) in inputs.enumerate() {
            let Ok(name) = device.name() else { continue };
            let (sample_rate, channels) = device
                .default_input_config()
                .map(|c| (c.sample_rate().0, c.channels()))
                .unwrap_or((DEFAULT_DEVICE_SAMPLE_RATE, 1));
            devices.push(AudioDeviceInfo {
                index,
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rate,
                channels,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for (index, device) in outputs.enumerate() {
            let Ok(name) = device.name() else { continue };
            let (sample_rate, channels) = device
                .default_output_config()
                .map(|c| (c.sample_rate().0, c.channels()))
                .unwrap_or((DEFAULT_DEVICE_SAMPLE_RATE, 2));
            devices.push(AudioDeviceInfo {
                index,
                is_default: default_output_name.as_ref() == Some(&name),
                name,
                is_input: false,
                is_output: true,
                sample_rate,
                channels,
            });
        }
    }

    devices
}

/// Open a device by direction and index (`None` = host default)
pub fn get_device(direction: Direction, index: Option<usize>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let device = match (direction, index) {
        (Direction::Input, None) => host.default_input_device(),
        (Direction::Output, None) => host.default_output_device(),
        (Direction::Input, Some(i)) => host
            .input_devices()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .nth(i),
        (Direction::Output, Some(i)) => host
            .output_devices()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .nth(i),
    }
    .ok_or_else(|| AudioError::DeviceNotFound(format!("{:?} device {:?}", direction, index)))?;

    AudioDevice::from_cpal(device, direction)
}

/// Resolve a configured device name to an index.
///
/// An empty name means the host default and resolves to `None`, as does a
/// name that is no longer present.
pub fn find_device_index(devices: &[AudioDeviceInfo], direction: Direction, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    devices
        .iter()
        .filter(|d| match direction {
            Direction::Input => d.is_input,
            Direction::Output => d.is_output,
        })
        .find(|d| d.name == name)
        .map(|d| d.index)
}
