//! Lifecycle observer
//!
//! Runs on its own thread for the length of a call. It starts both pumps,
//! waits for the first event that ends the call, then tears everything
//! down in order: stop flag, pump joins, transport close, report.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use crate::audio::{CaptureSource, PlaybackSink};
use crate::error::StreamFault;
use crate::network::{Transport, TransportReader, TransportWriter};
use crate::session::pump::{run_inbound, run_outbound, PumpContext};
use crate::session::state::{CallStats, SessionState};
use crate::session::{CallPhase, CallReport, CallShared, EndReason};

/// Messages that end a call
#[derive(Debug, Clone)]
pub(crate) enum LifecycleEvent {
    Hangup,
    Ended(EndReason),
}

/// Everything the observer needs besides the ports and transport halves
pub(crate) struct CallContext {
    pub call_id: Uuid,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub identity_delivered: Option<bool>,
    pub frame_bytes: usize,
    /// Per-frame diagnostics in the pumps
    pub verbose: bool,
    pub state: Arc<SessionState>,
    pub stats: Arc<CallStats>,
    pub shared: Arc<CallShared>,
    pub events_tx: Sender<LifecycleEvent>,
    pub events_rx: Receiver<LifecycleEvent>,
}

fn spawn_pump<T, F>(name: &str, ctx: &PumpContext, run: F) -> std::io::Result<JoinHandle<Option<T>>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let ctx = ctx.clone();
    let pump = name.to_string();
    thread::Builder::new()
        .name(format!("call-{}", name))
        .spawn(move || match panic::catch_unwind(AssertUnwindSafe(run)) {
            Ok(half) => Some(half),
            Err(_) => {
                ctx.end(EndReason::Fault(StreamFault::Worker(format!(
                    "{} pump panicked",
                    pump
                ))));
                None
            }
        })
}

fn join_pump<T>(name: &str, handle: Option<JoinHandle<Option<T>>>) -> Option<T> {
    match handle?.join() {
        Ok(half) => half,
        Err(_) => {
            tracing::error!("{} pump thread failed", name);
            None
        }
    }
}

/// Observer thread body
pub(crate) fn observe_call<C, P>(
    ctx: CallContext,
    capture: C,
    playback: P,
    reader: TransportReader,
    writer: TransportWriter,
) where
    C: CaptureSource,
    P: PlaybackSink,
{
    let pump_ctx = PumpContext {
        state: ctx.state.clone(),
        stats: ctx.stats.clone(),
        events: ctx.events_tx.clone(),
        verbose: ctx.verbose,
    };
    let frame_bytes = ctx.frame_bytes;

    let mut spawn_error = None;
    let outbound = {
        let run_ctx = pump_ctx.clone();
        spawn_pump("outbound", &pump_ctx, move || {
            run_outbound(run_ctx, capture, writer, frame_bytes)
        })
        .map_err(|e| spawn_error = Some(e))
        .ok()
    };
    let inbound = {
        let run_ctx = pump_ctx.clone();
        spawn_pump("inbound", &pump_ctx, move || {
            run_inbound(run_ctx, playback, reader, frame_bytes)
        })
        .map_err(|e| spawn_error = Some(e))
        .ok()
    };
    drop(pump_ctx);

    let reason = match spawn_error {
        Some(e) => {
            tracing::error!("Failed to start stream pump: {}", e);
            EndReason::Fault(StreamFault::Worker(e.to_string()))
        }
        None => match ctx.events_rx.recv() {
            Ok(LifecycleEvent::Ended(reason)) => reason,
            Ok(LifecycleEvent::Hangup) | Err(_) => {
                tracing::info!("Call {} hanging up", ctx.call_id);
                EndReason::LocalHangup
            }
        },
    };

    ctx.shared.set_phase(CallPhase::Stopping);
    ctx.state.deactivate();

    let writer = join_pump("outbound", outbound);
    let reader = join_pump("inbound", inbound);
    match (reader, writer) {
        (Some(reader), Some(writer)) => {
            let mut transport = Transport::reunite(reader, writer);
            transport.close();
        }
        _ => tracing::debug!("Transport half lost with its pump, dropping connection"),
    }
    ctx.state.set_connected(false);

    let report = CallReport {
        call_id: ctx.call_id,
        destination: ctx.destination,
        started_at: ctx.started_at,
        ended_at: Utc::now(),
        reason,
        identity_delivered: ctx.identity_delivered,
        stats: ctx.stats.snapshot(),
    };
    tracing::info!(
        "Call {} ended after {:.1}s: {} ({} bytes sent, {} bytes received)",
        report.call_id,
        report.duration().as_secs_f64(),
        report.reason,
        report.stats.bytes_sent,
        report.stats.bytes_received
    );
    ctx.shared.finish(report);
}
