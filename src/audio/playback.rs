//! Audio playback to the output device

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_queue, SharedSampleQueue};
use crate::audio::device::{find_output_device, select_stream, StreamSelection};
use crate::audio::pcm::decode_samples;
use crate::audio::PlaybackSink;
use crate::config::PcmFormat;
use crate::constants::DEVICE_QUEUE_FRAMES;
use crate::error::AudioError;

/// Speaker playback port
pub struct AudioPlayback {
    device_name: Option<String>,
    format: PcmFormat,
    selection: StreamSelection,
    running: Arc<AtomicBool>,
    /// Samples waiting for the output callback
    queue: SharedSampleQueue,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    /// Trailing bytes of a sample split across two writes
    pending: Vec<u8>,
    decoded: Vec<f32>,
}

impl AudioPlayback {
    /// Open the playback port for `device_name`
    pub fn new(
        device_name: Option<&str>,
        format: PcmFormat,
        frame_bytes: usize,
    ) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let selection = select_stream(&device, &format)?;

        let frame_samples = frame_bytes / format.encoding.bytes_per_sample();

        tracing::debug!(
            "Playback device '{}' selected ({:?} samples)",
            device.name,
            selection.sample_format
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            format,
            selection,
            running: Arc::new(AtomicBool::new(false)),
            queue: create_shared_queue(frame_samples.max(1) * DEVICE_QUEUE_FRAMES),
            thread_handle: None,
            error_rx: None,
            pending: Vec::with_capacity(4),
            decoded: Vec::with_capacity(frame_samples),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Samples queued for the device
    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl PlaybackSink for AudioPlayback {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_output_device(self.device_name.as_deref())?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let queue = self.queue.clone();
        let selection = self.selection.clone();

        self.queue.clear();
        self.pending.clear();
        self.running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("call-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(device.inner(), &selection, queue, error_tx)
                {
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

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Speaker live stream started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamError("playback thread exited".to_string()))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        if let Some(err) = self.check_errors() {
            return Err(err);
        }
        if !self.is_running() {
            return Err(AudioError::StreamError("playback not started".to_string()));
        }

        self.decoded.clear();
        let encoding = self.format.encoding;
        let mut rest = data;

        // Complete a sample left over from the previous write
        if !self.pending.is_empty() {
            let missing = encoding.bytes_per_sample() - self.pending.len();
            let take = missing.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == encoding.bytes_per_sample() {
                decode_samples(&self.pending, encoding, &mut self.decoded);
                self.pending.clear();
            }
        }

        let consumed = decode_samples(rest, encoding, &mut self.decoded);
        self.pending.extend_from_slice(&rest[consumed..]);

        if self.queue.push_samples(self.decoded.iter().copied()) > 0 {
            tracing::debug!("Playback queue full, dropped oldest samples");
        }
        Ok(())
    }

    fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.queue.clear();
        self.pending.clear();

        if was_running {
            tracing::info!(
                "Speaker live stream ended ({} underruns)",
                self.queue.underrun_count()
            );
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(
    device: &cpal::Device,
    selection: &StreamSelection,
    queue: SharedSampleQueue,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    match selection.sample_format {
        SampleFormat::F32 => build_output::<f32>(device, selection, queue, error_tx),
        SampleFormat::I16 => build_output::<i16>(device, selection, queue, error_tx),
        SampleFormat::U16 => build_output::<u16>(device, selection, queue, error_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_output<T>(
    device: &cpal::Device,
    selection: &StreamSelection,
    queue: SharedSampleQueue,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            &selection.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                queue.pop_or_silence(&mut scratch);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample_(*sample);
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
