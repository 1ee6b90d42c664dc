//! Native audio backend built on cpal

use crate::audio::capture::AudioCapture;
use crate::audio::device::{find_input_device, select_stream};
use crate::audio::playback::AudioPlayback;
use crate::audio::AudioBackend;
use crate::config::{AudioConfig, PcmFormat};
use crate::error::AudioError;

/// Backend that opens the host's input and output devices
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    /// Use the system default devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the devices named in the `[audio]` config section
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }

    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

impl AudioBackend for CpalBackend {
    type Capture = AudioCapture;
    type Playback = AudioPlayback;

    fn probe_capture(&self, format: &PcmFormat) -> bool {
        match AudioCapture::probe(self.input_device.as_deref(), format) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Capture probe failed: {}", e);
                false
            }
        }
    }

    fn open_capture(
        &self,
        format: &PcmFormat,
        frame_bytes: usize,
    ) -> Result<AudioCapture, AudioError> {
        AudioCapture::new(self.input_device.as_deref(), *format, frame_bytes)
    }

    fn open_playback(
        &self,
        format: &PcmFormat,
        frame_bytes: usize,
    ) -> Result<AudioPlayback, AudioError> {
        AudioPlayback::new(self.output_device.as_deref(), *format, frame_bytes)
    }

    fn min_frame_bytes(&self, format: &PcmFormat) -> Option<usize> {
        let device = find_input_device(self.input_device.as_deref()).ok()?;
        let selection = select_stream(&device, format).ok()?;
        selection
            .min_buffer_frames
            .map(|frames| frames as usize * format.bytes_per_sample_frame())
    }
}
