//! Audio host and device selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleRate, SupportedStreamConfig};
use serde::Serialize;

use crate::{Error, Result};

/// Owned audio device selection shared by capture and playback
///
/// Constructed explicitly and handed to each unit; devices are opened by
/// the unit's own audio thread when it starts.
#[derive(Debug, Clone, Default)]
pub struct AudioContext {
    input_device: Option<String>,
    output_device: Option<String>,
}

/// Device names reported by the host
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceList {
    /// Default input device name
    pub default_input: Option<String>,
    /// Default output device name
    pub default_output: Option<String>,
    /// All input device names
    pub inputs: Vec<String>,
    /// All output device names
    pub outputs: Vec<String>,
}

impl AudioContext {
    /// Use the given devices, falling back to the host defaults when `None`
    #[must_use]
    pub const fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    /// Configured input device name
    #[must_use]
    pub fn input_device_name(&self) -> Option<&str> {
        self.input_device.as_deref()
    }

    /// Configured output device name
    #[must_use]
    pub fn output_device_name(&self) -> Option<&str> {
        self.output_device.as_deref()
    }

    /// Open the input device
    pub(crate) fn input_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.input_device {
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == *name))
                .ok_or_else(|| Error::DeviceUnavailable(format!("input device not found: {name}"))),
            None => host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string())),
        }
    }

    /// Open the output device
    pub(crate) fn output_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.output_device {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == *name))
                .ok_or_else(|| {
                    Error::DeviceUnavailable(format!("output device not found: {name}"))
                }),
            None => host
                .default_output_device()
                .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string())),
        }
    }

    /// List devices on the default host
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate devices
    pub fn devices() -> Result<DeviceList> {
        let host = cpal::default_host();

        let inputs = host
            .input_devices()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .collect();
        let outputs = host
            .output_devices()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .collect();

        Ok(DeviceList {
            default_input: host.default_input_device().and_then(|d| d.name().ok()),
            default_output: host.default_output_device().and_then(|d| d.name().ok()),
            inputs,
            outputs,
        })
    }
}

/// Pick an input config: mono at `rate` if supported, else the device default
pub(crate) fn input_config(device: &Device, rate: u32) -> Result<SupportedStreamConfig> {
    let exact = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        });

    match exact {
        Some(c) => Ok(c.with_sample_rate(SampleRate(rate))),
        None => device
            .default_input_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string())),
    }
}

/// Pick an output config: mono then stereo at `rate`, else the device default
pub(crate) fn output_config(device: &Device, rate: u32) -> Result<SupportedStreamConfig> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        })
    };

    match supports(1).or_else(|| supports(2)) {
        Some(c) => Ok(c.with_sample_rate(SampleRate(rate))),
        None => device
            .default_output_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string())),
    }
}
