//! Call session lifecycle
//!
//! A [`CallSession`] dials one destination and runs at most one call:
//! gate the microphone, connect, send the optional identity, then hand
//! the split transport and the audio ports to the lifecycle observer.
//! The observer owns both pumps until the call ends and leaves a
//! [`CallReport`] behind.

mod observer;
mod pump;
pub mod state;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::{check_capture_permission, AudioBackend};
use crate::config::SessionConfig;
use crate::constants::LIFECYCLE_CHANNEL_CAPACITY;
use crate::error::{CallError, ConfigError, StreamFault};
use crate::network::Transport;

use observer::{observe_call, CallContext, LifecycleEvent};
pub use state::{CallStats, SessionState, StatsSnapshot};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Gating,
    Connecting,
    Handshaking,
    Streaming,
    Stopping,
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// `end_call` or a [`HangupHandle`]
    LocalHangup,
    /// The server closed the connection
    RemoteClosed,
    Fault(StreamFault),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LocalHangup => write!(f, "local hangup"),
            EndReason::RemoteClosed => write!(f, "remote closed"),
            EndReason::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

/// Summary of a finished call
#[derive(Debug, Clone, Serialize)]
pub struct CallReport {
    pub call_id: Uuid,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub reason: EndReason,
    /// `None` when no identity was configured
    pub identity_delivered: Option<bool>,
    pub stats: StatsSnapshot,
}

impl CallReport {
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }
}

/// Phase and outcome shared with the observer thread
pub(crate) struct CallShared {
    phase: Mutex<CallPhase>,
    phase_changed: Condvar,
    report: Mutex<Option<CallReport>>,
}

impl CallShared {
    fn new() -> Self {
        Self {
            phase: Mutex::new(CallPhase::Idle),
            phase_changed: Condvar::new(),
            report: Mutex::new(None),
        }
    }

    fn phase(&self) -> CallPhase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: CallPhase) {
        let mut current = self.phase.lock();
        if *current != phase {
            tracing::debug!("Call phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
        self.phase_changed.notify_all();
    }

    /// Store the report, then return to idle
    pub(crate) fn finish(&self, report: CallReport) {
        *self.report.lock() = Some(report);
        self.set_phase(CallPhase::Idle);
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut phase = self.phase.lock();
        while *phase != CallPhase::Idle {
            if self.phase_changed.wait_until(&mut phase, deadline).timed_out() {
                return *phase == CallPhase::Idle;
            }
        }
        true
    }
}

/// Ends a call from any thread
#[derive(Clone)]
pub struct HangupHandle {
    events: Sender<LifecycleEvent>,
}

impl HangupHandle {
    /// Ask the observer to end the call; does not wait for teardown
    pub fn hangup(&self) {
        if let Err(e) = self.events.try_send(LifecycleEvent::Hangup) {
            tracing::debug!("Hangup not delivered: {}", e);
        }
    }
}

/// Send the client identity as a single write.
///
/// Returns `None` when there is no identity to send. A failed write is
/// logged and does not stop the call.
fn send_identity(transport: &mut Transport, client_id: &[u8]) -> Option<bool> {
    if client_id.is_empty() {
        return None;
    }
    match transport.write(client_id) {
        Ok(()) => {
            tracing::debug!("Identity sent ({} bytes)", client_id.len());
            Some(true)
        }
        Err(e) => {
            tracing::warn!("IdentityDeliveryFailed: {}", e);
            Some(false)
        }
    }
}

/// One outbound voice call
pub struct CallSession<B: AudioBackend> {
    config: SessionConfig,
    backend: B,
    call_id: Uuid,
    shared: Arc<CallShared>,
    events_tx: Sender<LifecycleEvent>,
    events_rx: Receiver<LifecycleEvent>,
    state: Option<Arc<SessionState>>,
    observer: Option<JoinHandle<()>>,
    /// Set once a call has streamed; a spent session cannot redial
    spent: bool,
}

impl<B: AudioBackend> CallSession<B> {
    pub fn new(config: SessionConfig, backend: B) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events_tx, events_rx) = bounded(LIFECYCLE_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            backend,
            call_id: Uuid::new_v4(),
            shared: Arc::new(CallShared::new()),
            events_tx,
            events_rx,
            state: None,
            observer: None,
            spent: false,
        })
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> CallPhase {
        self.shared.phase()
    }

    /// Whether both pumps are (still) meant to be running
    pub fn is_active(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_active())
    }

    /// Report of the finished call, if there is one
    pub fn report(&self) -> Option<CallReport> {
        self.shared.report.lock().clone()
    }

    pub fn hangup_handle(&self) -> HangupHandle {
        HangupHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Frame size actually used: the configured size, raised to what the
    /// capture device needs at minimum
    pub fn effective_frame_bytes(&self) -> usize {
        let configured = self.config.frame_bytes;
        match self.backend.min_frame_bytes(&self.config.format) {
            Some(minimum) if minimum > configured => {
                tracing::debug!(
                    "Frame size raised from {} to device minimum {} bytes",
                    configured,
                    minimum
                );
                minimum
            }
            _ => configured,
        }
    }

    /// Gate, connect, send the identity and start streaming.
    ///
    /// Returns once the call is streaming; it then runs until
    /// [`end_call`](Self::end_call), a hangup handle, the far end or a
    /// stream fault stops it.
    pub fn start_call(&mut self) -> Result<(), CallError> {
        if self.phase() != CallPhase::Idle {
            return Err(CallError::AlreadyActive);
        }
        if self.spent {
            return Err(CallError::SessionSpent);
        }

        let destination = self.config.destination();
        let state = Arc::new(SessionState::new());

        self.shared.set_phase(CallPhase::Gating);
        let granted = check_capture_permission(&self.backend, &self.config.format);
        state.set_permission(granted);
        if !granted {
            self.shared.set_phase(CallPhase::Idle);
            return Err(CallError::PermissionDenied);
        }

        self.shared.set_phase(CallPhase::Connecting);
        tracing::info!(
            "Call {} dialing {} ({})",
            self.call_id,
            destination,
            self.config.security
        );
        let mut transport = match Transport::connect(&self.config) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("Call {} failed to connect: {}", self.call_id, e);
                self.shared.set_phase(CallPhase::Idle);
                return Err(e.into());
            }
        };
        state.set_connected(true);

        self.shared.set_phase(CallPhase::Handshaking);
        let frame_bytes = self.effective_frame_bytes();
        let format = self.config.format;
        let ports = self
            .backend
            .open_capture(&format, frame_bytes)
            .and_then(|capture| {
                self.backend
                    .open_playback(&format, frame_bytes)
                    .map(|playback| (capture, playback))
            });
        let (capture, playback) = match ports {
            Ok(ports) => ports,
            Err(e) => {
                tracing::error!("Call {} could not open audio: {}", self.call_id, e);
                transport.close();
                state.set_connected(false);
                self.shared.set_phase(CallPhase::Idle);
                return Err(e.into());
            }
        };

        let identity_delivered = send_identity(&mut transport, &self.config.client_id);

        let (reader, writer) = match transport.split() {
            Ok(halves) => halves,
            Err(e) => {
                self.shared.set_phase(CallPhase::Idle);
                return Err(CallError::Worker(e));
            }
        };

        if !state.activate() {
            self.shared.set_phase(CallPhase::Idle);
            return Err(CallError::Worker(io::Error::other(
                "call state could not be activated",
            )));
        }

        // Hangups sent while no call was running must not end this one
        while self.events_rx.try_recv().is_ok() {}

        let context = CallContext {
            call_id: self.call_id,
            destination: destination.clone(),
            started_at: Utc::now(),
            identity_delivered,
            frame_bytes,
            verbose: self.config.debug,
            state: state.clone(),
            stats: Arc::new(CallStats::default()),
            shared: self.shared.clone(),
            events_tx: self.events_tx.clone(),
            events_rx: self.events_rx.clone(),
        };

        // Streaming before spawn, so a call that ends at once is not
        // pulled back out of Idle
        self.shared.set_phase(CallPhase::Streaming);
        let observer = thread::Builder::new()
            .name("call-observer".to_string())
            .spawn(move || observe_call(context, capture, playback, reader, writer));

        match observer {
            Ok(handle) => {
                tracing::info!(
                    "Call {} streaming with {} ({} byte frames)",
                    self.call_id,
                    destination,
                    frame_bytes
                );
                self.observer = Some(handle);
                self.state = Some(state);
                self.spent = true;
                Ok(())
            }
            Err(e) => {
                state.deactivate();
                self.shared.set_phase(CallPhase::Idle);
                Err(CallError::Worker(e))
            }
        }
    }

    /// Hang up and wait for teardown. A no-op when no call is running;
    /// safe to call repeatedly.
    pub fn end_call(&mut self) {
        let Some(observer) = self.observer.take() else {
            tracing::debug!("end_call: no call in progress");
            return;
        };

        if let Err(e) = self.events_tx.try_send(LifecycleEvent::Hangup) {
            tracing::debug!("Hangup not queued: {}", e);
        }
        if observer.join().is_err() {
            tracing::error!("Lifecycle observer for call {} panicked", self.call_id);
            if let Some(state) = &self.state {
                state.deactivate();
            }
            self.shared.set_phase(CallPhase::Idle);
        }
    }

    /// Block until the call is back to idle or `timeout` passes.
    ///
    /// Returns the end reason, or `None` on timeout or if no call ran.
    pub fn wait_for_end(&self, timeout: Duration) -> Option<EndReason> {
        if !self.shared.wait_idle(timeout) {
            return None;
        }
        self.shared
            .report
            .lock()
            .as_ref()
            .map(|report| report.reason.clone())
    }
}

impl<B: AudioBackend> Drop for CallSession<B> {
    fn drop(&mut self) {
        self.end_call();
    }
}
