//! Audio subsystem module
//!
//! The call session only sees the port traits below. Native devices are
//! reached through [`CpalBackend`]; [`MemoryBackend`] is a scripted
//! in-process backend for tests and loopback runs.

pub mod buffer;
pub mod gate;
pub mod memory;
pub mod pcm;

#[cfg(feature = "cpal-backend")]
pub mod backend;
#[cfg(feature = "cpal-backend")]
pub mod capture;
#[cfg(feature = "cpal-backend")]
pub mod device;
#[cfg(feature = "cpal-backend")]
pub mod playback;

pub use buffer::SampleQueue;
pub use gate::check_capture_permission;
pub use memory::{MemoryBackend, ScriptedRead};

#[cfg(feature = "cpal-backend")]
pub use backend::CpalBackend;
#[cfg(feature = "cpal-backend")]
pub use capture::AudioCapture;
#[cfg(feature = "cpal-backend")]
pub use device::{get_device_by_id, list_devices, AudioDevice, AudioDeviceInfo};
#[cfg(feature = "cpal-backend")]
pub use playback::AudioPlayback;

use crate::config::PcmFormat;
use crate::error::AudioError;

/// Outcome of a single capture read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// `n` bytes were written into the buffer (may be short or zero)
    Data(usize),
    /// The device was in a state that does not allow reads
    InvalidOperation,
    /// The device rejected the read parameters
    BadValue,
}

/// Source of captured PCM frames
pub trait CaptureSource: Send + 'static {
    fn start(&mut self) -> Result<(), AudioError>;

    /// Fill `buf` with at most `buf.len()` bytes of PCM.
    ///
    /// Warnings come back as `Ok`; only a device failure is an `Err`.
    fn read(&mut self, buf: &mut [u8]) -> Result<FrameRead, AudioError>;

    fn stop(&mut self);
}

/// Sink for received PCM frames
pub trait PlaybackSink: Send + 'static {
    fn start(&mut self) -> Result<(), AudioError>;

    fn write(&mut self, data: &[u8]) -> Result<(), AudioError>;

    fn stop(&mut self);
}

/// Factory for the capture and playback ports of one call
pub trait AudioBackend {
    type Capture: CaptureSource;
    type Playback: PlaybackSink;

    /// Check whether capture can be initialised in `format`.
    fn probe_capture(&self, format: &PcmFormat) -> bool;

    fn open_capture(
        &self,
        format: &PcmFormat,
        frame_bytes: usize,
    ) -> Result<Self::Capture, AudioError>;

    fn open_playback(
        &self,
        format: &PcmFormat,
        frame_bytes: usize,
    ) -> Result<Self::Playback, AudioError>;

    /// Smallest frame the device can deliver, in bytes
    fn min_frame_bytes(&self, _format: &PcmFormat) -> Option<usize> {
        None
    }
}
