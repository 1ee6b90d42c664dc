//! Error types for the voice call client

use std::time::Duration;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Call error: {0}")]
    Call(#[from] CallError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device fault: {0}")]
    DeviceFault(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Destination address is empty")]
    EmptyAddress,

    #[error("Sample rate must be greater than zero")]
    InvalidSampleRate,

    #[error("Unsupported channel count: {0}")]
    InvalidChannels(u16),

    #[error("Unsupported bit depth: {0}")]
    InvalidBitDepth(u16),

    #[error("Frame buffer size must be greater than zero")]
    InvalidFrameSize,

    #[error("Connect timeout must be greater than zero")]
    InvalidTimeout,

    #[error("Invalid security mode: {0}")]
    InvalidSecurityMode(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of connect failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    Timeout,
    Refused,
    TlsUnsupported,
    Other,
}

/// Connection establishment errors
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection refused by {0}")]
    Refused(String),

    #[error("Unsupported TLS version: {0}")]
    UnsupportedTlsVersion(String),

    #[error("Could not resolve {0}")]
    Resolve(String),

    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("Failed to load trust anchors: {0}")]
    TrustStore(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            ConnectError::Timeout(_) => ConnectErrorKind::Timeout,
            ConnectError::Refused(_) => ConnectErrorKind::Refused,
            ConnectError::UnsupportedTlsVersion(_) => ConnectErrorKind::TlsUnsupported,
            _ => ConnectErrorKind::Other,
        }
    }
}

/// Reasons a call could not be started
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Microphone capture is not available")]
    PermissionDenied,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Audio device error: {0}")]
    Audio(#[from] AudioError),

    #[error("A call is already in progress")]
    AlreadyActive,

    #[error("Session already completed a call; create a new session to redial")]
    SessionSpent,

    #[error("Failed to start call worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Faults that end a call while it is streaming
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum StreamFault {
    #[error("Capture stream failed: {0}")]
    Capture(String),

    #[error("Playback stream failed: {0}")]
    Playback(String),

    #[error("Network stream failed: {0}")]
    Network(String),

    #[error("Call worker failed: {0}")]
    Worker(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
