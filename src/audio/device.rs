//! Audio device enumeration and stream format selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig, SupportedBufferSize};
use serde::Serialize;

use crate::config::PcmFormat;
use crate::error::AudioError;

/// Device sample formats we know how to convert, best first
const PREFERRED_FORMATS: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Serializable description of a device
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// Stream parameters chosen for a device
#[derive(Debug, Clone)]
pub struct StreamSelection {
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    /// Smallest callback size the device reports, in sample frames
    pub min_buffer_frames: Option<u32>,
}

/// Pick a device configuration matching `format` exactly in rate and
/// channel count, preferring float samples.
pub fn select_stream(
    device: &AudioDevice,
    format: &PcmFormat,
) -> Result<StreamSelection, AudioError> {
    let rate = cpal::SampleRate(format.sample_rate);
    let ranges: Vec<cpal::SupportedStreamConfigRange> = if device.is_input {
        device
            .inner
            .supported_input_configs()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .collect()
    } else {
        device
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .collect()
    };

    let matching: Vec<_> = ranges
        .iter()
        .filter(|c| {
            c.channels() == format.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .collect();

    let best = PREFERRED_FORMATS
        .iter()
        .find_map(|wanted| matching.iter().find(|c| c.sample_format() == *wanted))
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{} does not support {} Hz with {} channel(s)",
                device.name, format.sample_rate, format.channels
            ))
        })?;

    let min_buffer_frames = match best.buffer_size() {
        SupportedBufferSize::Range { min, .. } => Some(*min),
        SupportedBufferSize::Unknown => None,
    };

    Ok(StreamSelection {
        config: StreamConfig {
            channels: format.channels,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        },
        sample_format: best.sample_format(),
        min_buffer_frames,
    })
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                let (sample_rates, channels) = get_device_capabilities(&device, true);

                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                let (sample_rates, channels) = get_device_capabilities(&device, false);

                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(AudioDeviceInfo {
                        id: format!("output:{}", name),
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                        sample_rates,
                        channels,
                    });
                }
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in [8000u32, 16000, 22050, 44100, 48000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Get a device by its ID (`input:<name>` or `output:<name>`)
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };
    let devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, is_input, !is_input));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Named input device, or the system default when `name` is `None`
pub fn find_input_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    match name {
        Some(name) => get_device_by_id(&format!("input:{}", name)),
        None => cpal::default_host()
            .default_input_device()
            .map(|d| AudioDevice::from_cpal(d, true, false))
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
    }
}

/// Named output device, or the system default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    match name {
        Some(name) => get_device_by_id(&format!("output:{}", name)),
        None => cpal::default_host()
            .default_output_device()
            .map(|d| AudioDevice::from_cpal(d, false, true))
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_device_is_not_found() {
        let result = get_device_by_id("input:definitely-not-a-real-device-name");
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_listed_devices_have_prefixed_ids() {
        // Device availability depends on the machine; only check shape
        for device in list_devices() {
            assert!(device.id.starts_with("input:") || device.id.starts_with("output:"));
            assert!(device.is_input || device.is_output);
        }
    }
}
