//! Audio capture from the input device
//!
//! The cpal stream lives on its own thread for its whole lifetime; the
//! callback pushes samples into a [`SampleQueue`] and the outbound pump
//! pulls whole frames out through [`CaptureSource::read`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_queue, SharedSampleQueue};
use crate::audio::device::{find_input_device, select_stream, StreamSelection};
use crate::audio::pcm::encode_samples;
use crate::audio::{CaptureSource, FrameRead};
use crate::config::PcmFormat;
use crate::constants::DEVICE_QUEUE_FRAMES;
use crate::error::AudioError;

/// Microphone capture port
pub struct AudioCapture {
    /// Device name, `None` for the system default
    device_name: Option<String>,

    format: PcmFormat,

    selection: StreamSelection,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Samples captured but not yet read
    queue: SharedSampleQueue,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Total samples captured
    samples_captured: Arc<AtomicU64>,

    /// Conversion scratch, reused across reads
    scratch: Vec<f32>,

    /// Longest a read waits for a full frame
    read_timeout: Duration,
}

impl AudioCapture {
    /// Open the capture port for `device_name`
    pub fn new(
        device_name: Option<&str>,
        format: PcmFormat,
        frame_bytes: usize,
    ) -> Result<Self, AudioError> {
        let device = find_input_device(device_name)?;
        let selection = select_stream(&device, &format)?;

        let frame_samples = frame_bytes / format.encoding.bytes_per_sample();
        let queue = create_shared_queue(frame_samples.max(1) * DEVICE_QUEUE_FRAMES);

        tracing::debug!(
            "Capture device '{}' selected ({:?} samples)",
            device.name,
            selection.sample_format
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            format,
            selection,
            running: Arc::new(AtomicBool::new(false)),
            queue,
            thread_handle: None,
            error_rx: None,
            samples_captured: Arc::new(AtomicU64::new(0)),
            scratch: Vec::with_capacity(frame_samples),
            read_timeout: format.duration_of(frame_bytes) * 2 + Duration::from_millis(10),
        })
    }

    /// Build an input stream once and drop it.
    ///
    /// On platforms that gate the microphone this is where access is
    /// granted or refused.
    pub fn probe(device_name: Option<&str>, format: &PcmFormat) -> Result<(), AudioError> {
        let device = find_input_device(device_name)?;
        let selection = select_stream(&device, format)?;
        let (error_tx, _error_rx) = bounded(1);
        let _stream = build_input_stream(
            device.inner(),
            &selection,
            create_shared_queue(1),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicU64::new(0)),
            error_tx,
        )?;
        Ok(())
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get total samples captured
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl CaptureSource for AudioCapture {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_input_device(self.device_name.as_deref())?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let queue = self.queue.clone();
        let samples_captured = self.samples_captured.clone();
        let selection = self.selection.clone();

        self.samples_captured.store(0, Ordering::SeqCst);
        self.queue.clear();
        self.running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("call-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(
                    device.inner(),
                    &selection,
                    queue,
                    running.clone(),
                    samples_captured,
                    error_tx,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Microphone live stream started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamError("capture thread exited".to_string()))
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<FrameRead, AudioError> {
        if let Some(err) = self.check_errors() {
            return Err(err);
        }
        if !self.is_running() {
            return Ok(FrameRead::InvalidOperation);
        }

        let wanted = buf.len() / self.format.encoding.bytes_per_sample();
        if wanted == 0 {
            return Ok(FrameRead::BadValue);
        }

        self.scratch.resize(wanted, 0.0);
        let got = self.queue.wait_pop(&mut self.scratch, self.read_timeout);
        let written = encode_samples(&self.scratch[..got], self.format.encoding, buf);
        Ok(FrameRead::Data(written))
    }

    fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.queue.clear();

        if was_running {
            tracing::info!(
                "Microphone live stream ended ({} samples captured, {} overflows)",
                self.samples_captured(),
                self.queue.overflow_count()
            );
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    device: &cpal::Device,
    selection: &StreamSelection,
    queue: SharedSampleQueue,
    running: Arc<AtomicBool>,
    samples_captured: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    match selection.sample_format {
        SampleFormat::F32 => {
            build_input::<f32>(device, selection, queue, running, samples_captured, error_tx)
        }
        SampleFormat::I16 => {
            build_input::<i16>(device, selection, queue, running, samples_captured, error_tx)
        }
        SampleFormat::U16 => {
            build_input::<u16>(device, selection, queue, running, samples_captured, error_tx)
        }
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_input<T>(
    device: &cpal::Device,
    selection: &StreamSelection,
    queue: SharedSampleQueue,
    running: Arc<AtomicBool>,
    samples_captured: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            &selection.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);
                queue.push_samples(data.iter().map(|s| f32::from_sample(*s)));
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
