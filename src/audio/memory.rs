//! In-memory audio backend
//!
//! Capture replays a script of reads and then produces silence paced at
//! the real frame rate; playback records every byte it is given. The
//! backend is a cheap clone around shared state so a test can keep a
//! handle while the session owns the ports.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::audio::{AudioBackend, CaptureSource, FrameRead, PlaybackSink};
use crate::config::{PcmFormat, SampleEncoding};
use crate::error::AudioError;

/// One scripted capture result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    /// Deliver these bytes (truncated to the read buffer)
    Frame(Vec<u8>),
    /// Deliver a zero-length read
    Empty,
    InvalidOperation,
    BadValue,
    /// Fail the read with a device fault
    Fault(String),
}

#[derive(Default)]
struct Counters {
    probes: AtomicUsize,
    capture_opens: AtomicUsize,
    capture_starts: AtomicUsize,
    capture_stops: AtomicUsize,
    capture_reads: AtomicUsize,
    playback_opens: AtomicUsize,
    playback_starts: AtomicUsize,
    playback_stops: AtomicUsize,
    playback_writes: AtomicUsize,
}

struct MemoryState {
    capture_denied: AtomicBool,
    script: Mutex<VecDeque<ScriptedRead>>,
    played: Mutex<Vec<u8>>,
    playback_fault: Mutex<Option<String>>,
    playback_open_fault: Mutex<Option<AudioError>>,
    min_frame_bytes: Mutex<Option<usize>>,
    counters: Counters,
}

/// Scripted audio backend
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState {
                capture_denied: AtomicBool::new(false),
                script: Mutex::new(VecDeque::new()),
                played: Mutex::new(Vec::new()),
                playback_fault: Mutex::new(None),
                playback_open_fault: Mutex::new(None),
                min_frame_bytes: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Make the capture probe fail
    pub fn deny_capture(&self) {
        self.state.capture_denied.store(true, Ordering::SeqCst);
    }

    /// Queue a capture result, consumed in order
    pub fn push_capture(&self, read: ScriptedRead) {
        self.state.script.lock().push_back(read);
    }

    /// Make the next playback write fail
    pub fn fail_playback(&self, reason: impl Into<String>) {
        *self.state.playback_fault.lock() = Some(reason.into());
    }

    /// Make opening the playback device fail
    pub fn fail_playback_open(&self, error: AudioError) {
        *self.state.playback_open_fault.lock() = Some(error);
    }

    pub fn set_min_frame_bytes(&self, bytes: usize) {
        *self.state.min_frame_bytes.lock() = Some(bytes);
    }

    /// Every byte handed to playback so far
    pub fn played_bytes(&self) -> Vec<u8> {
        self.state.played.lock().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.state.counters.probes.load(Ordering::SeqCst)
    }

    pub fn capture_opens(&self) -> usize {
        self.state.counters.capture_opens.load(Ordering::SeqCst)
    }

    pub fn capture_starts(&self) -> usize {
        self.state.counters.capture_starts.load(Ordering::SeqCst)
    }

    pub fn capture_stops(&self) -> usize {
        self.state.counters.capture_stops.load(Ordering::SeqCst)
    }

    pub fn capture_reads(&self) -> usize {
        self.state.counters.capture_reads.load(Ordering::SeqCst)
    }

    pub fn playback_opens(&self) -> usize {
        self.state.counters.playback_opens.load(Ordering::SeqCst)
    }

    pub fn playback_starts(&self) -> usize {
        self.state.counters.playback_starts.load(Ordering::SeqCst)
    }

    pub fn playback_stops(&self) -> usize {
        self.state.counters.playback_stops.load(Ordering::SeqCst)
    }

    pub fn playback_writes(&self) -> usize {
        self.state.counters.playback_writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MemoryBackend {
    type Capture = MemoryCapture;
    type Playback = MemoryPlayback;

    fn probe_capture(&self, _format: &PcmFormat) -> bool {
        self.state.counters.probes.fetch_add(1, Ordering::SeqCst);
        !self.state.capture_denied.load(Ordering::SeqCst)
    }

    fn open_capture(
        &self,
        format: &PcmFormat,
        _frame_bytes: usize,
    ) -> Result<MemoryCapture, AudioError> {
        self.state.counters.capture_opens.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryCapture {
            state: self.state.clone(),
            format: *format,
            running: false,
        })
    }

    fn open_playback(
        &self,
        _format: &PcmFormat,
        _frame_bytes: usize,
    ) -> Result<MemoryPlayback, AudioError> {
        if let Some(error) = self.state.playback_open_fault.lock().take() {
            return Err(error);
        }
        self.state.counters.playback_opens.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryPlayback {
            state: self.state.clone(),
            running: false,
        })
    }

    fn min_frame_bytes(&self, _format: &PcmFormat) -> Option<usize> {
        *self.state.min_frame_bytes.lock()
    }
}

/// Capture port of [`MemoryBackend`]
pub struct MemoryCapture {
    state: Arc<MemoryState>,
    format: PcmFormat,
    running: bool,
}

impl CaptureSource for MemoryCapture {
    fn start(&mut self) -> Result<(), AudioError> {
        self.state.counters.capture_starts.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<FrameRead, AudioError> {
        if !self.running {
            return Ok(FrameRead::InvalidOperation);
        }
        self.state.counters.capture_reads.fetch_add(1, Ordering::SeqCst);

        let next = self.state.script.lock().pop_front();
        match next {
            Some(ScriptedRead::Frame(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(FrameRead::Data(n))
            }
            Some(ScriptedRead::Empty) => Ok(FrameRead::Data(0)),
            Some(ScriptedRead::InvalidOperation) => Ok(FrameRead::InvalidOperation),
            Some(ScriptedRead::BadValue) => Ok(FrameRead::BadValue),
            Some(ScriptedRead::Fault(reason)) => Err(AudioError::DeviceFault(reason)),
            None => {
                // Out of script: behave like a live microphone in a quiet room
                thread::sleep(self.format.duration_of(buf.len()));
                let silence = match self.format.encoding {
                    SampleEncoding::U8 => 128,
                    SampleEncoding::I16 | SampleEncoding::F32 => 0,
                };
                buf.fill(silence);
                Ok(FrameRead::Data(buf.len()))
            }
        }
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.state.counters.capture_stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Playback port of [`MemoryBackend`]
pub struct MemoryPlayback {
    state: Arc<MemoryState>,
    running: bool,
}

impl PlaybackSink for MemoryPlayback {
    fn start(&mut self) -> Result<(), AudioError> {
        self.state.counters.playback_starts.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        if !self.running {
            return Err(AudioError::DeviceFault("playback not started".into()));
        }
        if let Some(reason) = self.state.playback_fault.lock().take() {
            return Err(AudioError::DeviceFault(reason));
        }
        self.state.counters.playback_writes.fetch_add(1, Ordering::SeqCst);
        self.state.played.lock().extend_from_slice(data);
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.state.counters.playback_stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_scripted_capture_then_silence() {
        let backend = MemoryBackend::new();
        backend.push_capture(ScriptedRead::Frame(vec![7; 4]));
        backend.push_capture(ScriptedRead::BadValue);
        backend.push_capture(ScriptedRead::Fault("unplugged".into()));

        let format = PcmFormat::default();
        let mut capture = backend.open_capture(&format, 640).unwrap();
        let mut buf = [0u8; 640];

        assert_eq!(capture.read(&mut buf).unwrap(), FrameRead::InvalidOperation);
        capture.start().unwrap();
        assert_eq!(capture.read(&mut buf).unwrap(), FrameRead::Data(4));
        assert_eq!(&buf[..4], &[7, 7, 7, 7]);
        assert_eq!(capture.read(&mut buf).unwrap(), FrameRead::BadValue);
        assert_eq!(
            capture.read(&mut buf).unwrap_err(),
            AudioError::DeviceFault("unplugged".into())
        );

        let start = Instant::now();
        assert_eq!(capture.read(&mut buf).unwrap(), FrameRead::Data(640));
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(buf.iter().all(|b| *b == 0));

        capture.stop();
        capture.stop();
        assert_eq!(backend.capture_stops(), 1);
    }

    #[test]
    fn test_playback_records_and_faults() {
        let backend = MemoryBackend::new();
        let mut playback = backend.open_playback(&PcmFormat::default(), 640).unwrap();

        assert!(playback.write(&[1, 2]).is_err());
        playback.start().unwrap();
        playback.write(&[1, 2]).unwrap();
        playback.write(&[3]).unwrap();
        assert_eq!(backend.played_bytes(), vec![1, 2, 3]);

        backend.fail_playback("speaker gone");
        assert!(playback.write(&[4]).is_err());
        assert_eq!(backend.playback_writes(), 2);
    }
}
