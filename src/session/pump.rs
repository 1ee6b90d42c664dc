//! Stream pumps moving frames between the audio ports and the transport

use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::audio::{CaptureSource, FrameRead, PlaybackSink};
use crate::error::StreamFault;
use crate::network::{TransportReader, TransportWriter};
use crate::session::observer::LifecycleEvent;
use crate::session::state::{CallStats, SessionState};
use crate::session::EndReason;

/// What each pump shares with the rest of the call
#[derive(Clone)]
pub(crate) struct PumpContext {
    pub state: Arc<SessionState>,
    pub stats: Arc<CallStats>,
    pub events: Sender<LifecycleEvent>,
    /// Per-frame debug logging
    pub verbose: bool,
}

impl PumpContext {
    /// Stop the call from inside a pump. Only the pump that actually
    /// flips `active` reports a reason.
    pub fn end(&self, reason: EndReason) {
        if !self.state.deactivate() {
            return;
        }
        match &reason {
            EndReason::Fault(fault) => tracing::error!("Call ended by fault: {}", fault),
            other => tracing::info!("Call ended: {}", other),
        }
        if let Err(e) = self.events.try_send(LifecycleEvent::Ended(reason)) {
            tracing::debug!("End of call not reported to observer: {}", e);
        }
    }

    fn fault(&self, fault: StreamFault) {
        self.end(EndReason::Fault(fault));
    }
}

/// Capture → network. Returns the writer half for teardown.
pub(crate) fn run_outbound<C: CaptureSource>(
    ctx: PumpContext,
    mut capture: C,
    mut writer: TransportWriter,
    frame_bytes: usize,
) -> TransportWriter {
    if let Err(e) = capture.start() {
        ctx.fault(StreamFault::Capture(e.to_string()));
        capture.stop();
        return writer;
    }

    let mut frame = vec![0u8; frame_bytes];
    tracing::debug!("Outbound pump running to {}", writer.peer_addr());

    while ctx.state.is_active() {
        match capture.read(&mut frame) {
            Ok(FrameRead::Data(0)) => {
                if ctx.verbose {
                    tracing::debug!("Capture returned no data");
                }
                ctx.stats.record_short_read();
            }
            Ok(FrameRead::Data(n)) => {
                if n < frame_bytes {
                    if ctx.verbose {
                        tracing::debug!("Short capture read: {} of {} bytes", n, frame_bytes);
                    }
                    ctx.stats.record_short_read();
                }
                if let Err(e) = writer.write(&frame[..n]) {
                    ctx.fault(StreamFault::Network(e.to_string()));
                    break;
                }
                ctx.stats.record_sent(n);
            }
            Ok(FrameRead::InvalidOperation) => {
                tracing::warn!("Capture read rejected: invalid operation");
                ctx.stats.record_capture_warning();
            }
            Ok(FrameRead::BadValue) => {
                tracing::warn!("Capture read rejected: bad value");
                ctx.stats.record_capture_warning();
            }
            Err(e) => {
                ctx.fault(StreamFault::Capture(e.to_string()));
                break;
            }
        }
    }

    capture.stop();
    tracing::debug!("Outbound pump stopped");
    writer
}

/// Network → playback. Returns the reader half for teardown.
pub(crate) fn run_inbound<P: PlaybackSink>(
    ctx: PumpContext,
    mut playback: P,
    mut reader: TransportReader,
    frame_bytes: usize,
) -> TransportReader {
    if let Err(e) = playback.start() {
        ctx.fault(StreamFault::Playback(e.to_string()));
        playback.stop();
        return reader;
    }

    let mut stop = ctx.state.stop_signal();
    let mut buf = vec![0u8; frame_bytes];
    tracing::debug!("Inbound pump running from {}", reader.peer_addr());

    while ctx.state.is_active() {
        match reader.read_until_stopped(&mut buf, &mut stop) {
            Ok(None) => break,
            Ok(Some(0)) => {
                ctx.end(EndReason::RemoteClosed);
                break;
            }
            Ok(Some(n)) => {
                if ctx.verbose {
                    tracing::debug!("Received {} bytes", n);
                }
                ctx.stats.record_received(n);
                if let Err(e) = playback.write(&buf[..n]) {
                    ctx.fault(StreamFault::Playback(e.to_string()));
                    break;
                }
            }
            Err(e) => {
                ctx.fault(StreamFault::Network(e.to_string()));
                break;
            }
        }
    }

    playback.stop();
    tracing::debug!("Inbound pump stopped");
    reader
}
