//! # VoIP Call Client
//!
//! Duplex raw-PCM voice calls to a single server over TCP or TLS.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         CallSession (session)                        │
//! │                                                                      │
//! │   start_call()                                                       │
//! │     ├─ Capability Gate (audio::gate) ── denied ──► Idle              │
//! │     ├─ Transport::connect (network) ── plain TCP / TLS               │
//! │     ├─ identity frame (client_id, optional)                          │
//! │     └─ Lifecycle Observer thread (session::observer)                 │
//! │            │                                                         │
//! │            ├──────────────────────┬───────────────────────┐          │
//! │            ▼                      ▼                       │          │
//! │   ┌─────────────────┐    ┌─────────────────┐              │          │
//! │   │ Outbound Pump   │    │  Inbound Pump   │              │          │
//! │   │ capture → write │    │ read → playback │              │          │
//! │   └────────┬────────┘    └────────┬────────┘              │          │
//! │            │     SessionState.active (atomic)             │          │
//! │            └──────────── fault / remote close ────────────┘          │
//! │                                                                      │
//! │   end_call() ── hangup ──► observer: stop, join pumps, close socket  │
//! └──────────────────────────────────────────────────────────────────────┘
//!            │  raw PCM frames, no framing           ▲
//!            ▼                                       │
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Voice server                                │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod session;

pub use config::{AppConfig, PcmFormat, SampleEncoding, SecurityMode, SessionConfig};
pub use error::{Error, Result};
pub use session::{CallPhase, CallReport, CallSession, EndReason, HangupHandle};

/// Application-wide constants
pub mod constants {
    /// Default destination address
    pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

    /// Default destination port
    pub const DEFAULT_PORT: u16 = 8080;

    /// Default connect (and I/O) timeout in seconds
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

    /// Default sample rate for voice
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default bit depth
    pub const DEFAULT_BIT_DEPTH: u16 = 16;

    /// Default frame buffer size in bytes (20 ms at the defaults above)
    pub const DEFAULT_FRAME_BYTES: usize = 640;

    /// Audio queued between a device callback and a port, in frames
    pub const DEVICE_QUEUE_FRAMES: usize = 16;

    /// Capacity of the lifecycle event channel
    pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 8;

    /// Directory name used for the config file
    pub const CONFIG_APP_NAME: &str = "voip-call";

    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "config.toml";
}
