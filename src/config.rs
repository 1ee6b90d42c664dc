//! Call configuration
//!
//! [`SessionConfig`] is the immutable per-call configuration handed to a
//! [`CallSession`](crate::session::CallSession). [`AppConfig`] is the
//! on-disk TOML form used by the `voip-call` binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Encoding of a single PCM sample on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 8-bit unsigned
    U8,
    /// 16-bit signed little-endian
    I16,
    /// 32-bit float little-endian
    F32,
}

impl SampleEncoding {
    pub fn from_bit_depth(bits: u16) -> Result<Self, ConfigError> {
        match bits {
            8 => Ok(SampleEncoding::U8),
            16 => Ok(SampleEncoding::I16),
            32 => Ok(SampleEncoding::F32),
            other => Err(ConfigError::InvalidBitDepth(other)),
        }
    }

    pub fn bit_depth(self) -> u16 {
        match self {
            SampleEncoding::U8 => 8,
            SampleEncoding::I16 => 16,
            SampleEncoding::F32 => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bit_depth() as usize / 8
    }
}

/// Raw PCM stream format shared by capture, playback and the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, bit_depth: u16) -> Result<Self, ConfigError> {
        let format = Self {
            sample_rate,
            channels,
            encoding: SampleEncoding::from_bit_depth(bit_depth)?,
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::InvalidChannels(self.channels));
        }
        Ok(())
    }

    /// Bytes for one sample across all channels
    pub fn bytes_per_sample_frame(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Bytes produced per second of audio
    pub fn byte_rate(&self) -> usize {
        self.bytes_per_sample_frame() * self.sample_rate as usize
    }

    /// Playback duration of `bytes` of audio in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let rate = self.byte_rate().max(1) as u64;
        Duration::from_micros(bytes as u64 * 1_000_000 / rate)
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            encoding: SampleEncoding::I16,
        }
    }
}

/// Transport security mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SecurityMode {
    #[default]
    Plain,
    /// TLS with the default protocol versions
    TlsAuto,
    /// TLS pinned to one named protocol version, e.g. `TLSv1.3`
    TlsVersion(String),
}

impl SecurityMode {
    /// Build from an `ssl` toggle and an optional version name (empty = auto)
    pub fn from_flags(ssl: bool, tls_version: &str) -> Self {
        match (ssl, tls_version.trim()) {
            (false, _) => SecurityMode::Plain,
            (true, "") => SecurityMode::TlsAuto,
            (true, version) => SecurityMode::TlsVersion(version.to_string()),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, SecurityMode::Plain)
    }
}

impl FromStr for SecurityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "plain" => Ok(SecurityMode::Plain),
            "tls-auto" => Ok(SecurityMode::TlsAuto),
            other => match other.strip_prefix("tls-version:") {
                Some(version) if !version.trim().is_empty() => {
                    Ok(SecurityMode::TlsVersion(version.trim().to_string()))
                }
                _ => Err(ConfigError::InvalidSecurityMode(s.to_string())),
            },
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::Plain => write!(f, "plain"),
            SecurityMode::TlsAuto => write!(f, "tls-auto"),
            SecurityMode::TlsVersion(version) => write!(f, "tls-version:{}", version),
        }
    }
}

/// Immutable per-call configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Destination host name or IP address (also the TLS server name)
    pub address: String,
    pub port: u16,
    /// Upper bound on connect + handshake, reused as the I/O timeout
    pub connect_timeout: Duration,
    pub security: SecurityMode,
    /// Extra PEM trust anchors for TLS
    pub ca_file: Option<PathBuf>,
    /// Identity sent once after connecting; empty skips the handshake
    pub client_id: Vec<u8>,
    pub format: PcmFormat,
    /// Frame buffer size in bytes
    pub frame_bytes: usize,
    /// Per-frame debug logging in the stream pumps
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            security: SecurityMode::Plain,
            ca_file: None,
            client_id: Vec::new(),
            format: PcmFormat::default(),
            frame_bytes: DEFAULT_FRAME_BYTES,
            debug: false,
        }
    }
}

impl SessionConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_security(mut self, security: SecurityMode) -> Self {
        self.security = security;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<Vec<u8>>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_format(mut self, format: PcmFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = frame_bytes;
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.frame_bytes == 0 {
            return Err(ConfigError::InvalidFrameSize);
        }
        self.format.validate()
    }

    /// `address:port` for log lines and error messages
    pub fn destination(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Split a `host:port` string, accepting `[v6]:port`
pub fn parse_destination(s: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidDestination(s.to_string());
    let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// `[call]` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub address: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub ssl: bool,
    /// Empty selects the default versions
    pub tls_version: String,
    pub ca_file: Option<PathBuf>,
    pub client_id: String,
    pub debug: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            ssl: false,
            tls_version: String::new(),
            ca_file: None,
            client_id: String::new(),
            debug: false,
        }
    }
}

/// `[audio]` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub frame_bytes: usize,
    /// Input device name, system default when unset
    pub input_device: Option<String>,
    /// Output device name, system default when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bit_depth: DEFAULT_BIT_DEPTH,
            frame_bytes: DEFAULT_FRAME_BYTES,
            input_device: None,
            output_device: None,
        }
    }
}

/// Application configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub call: CallConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Platform config location, e.g. `~/.config/voip-call/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", CONFIG_APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load from the default path, falling back to defaults if absent
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Build and validate the per-call configuration
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let config = SessionConfig {
            address: self.call.address.clone(),
            port: self.call.port,
            connect_timeout: Duration::from_secs(self.call.timeout_secs),
            security: SecurityMode::from_flags(self.call.ssl, &self.call.tls_version),
            ca_file: self.call.ca_file.clone(),
            client_id: self.call.client_id.clone().into_bytes(),
            format: PcmFormat::new(
                self.audio.sample_rate,
                self.audio.channels,
                self.audio.bit_depth,
            )?,
            frame_bytes: self.audio.frame_bytes,
            debug: self.call.debug,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default().session_config().unwrap();
        assert_eq!(config.destination(), "127.0.0.1:8080");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.security, SecurityMode::Plain);
        assert!(config.client_id.is_empty());
        assert_eq!(config.frame_bytes, 640);
        assert_eq!(config.format.encoding, SampleEncoding::I16);
        // 640 bytes of 16 kHz mono 16-bit audio
        assert_eq!(config.format.duration_of(640), Duration::from_millis(20));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = SessionConfig::default();

        let err = base.clone().with_frame_bytes(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFrameSize));

        let mut config = base.clone();
        config.format.sample_rate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSampleRate)));

        let mut config = base.clone();
        config.format.channels = 6;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidChannels(6))));

        let config = base.clone().with_connect_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout)));

        let config = SessionConfig::new("  ", 8080);
        assert!(matches!(config.validate(), Err(ConfigError::EmptyAddress)));

        assert!(matches!(
            PcmFormat::new(16000, 1, 24),
            Err(ConfigError::InvalidBitDepth(24))
        ));
    }

    #[test]
    fn test_security_mode_from_flags() {
        assert_eq!(SecurityMode::from_flags(false, "TLSv1.3"), SecurityMode::Plain);
        assert_eq!(SecurityMode::from_flags(true, ""), SecurityMode::TlsAuto);
        assert_eq!(
            SecurityMode::from_flags(true, "TLSv1.2"),
            SecurityMode::TlsVersion("TLSv1.2".into())
        );
    }

    #[test]
    fn test_security_mode_parse() {
        assert_eq!("plain".parse::<SecurityMode>().unwrap(), SecurityMode::Plain);
        assert_eq!("tls-auto".parse::<SecurityMode>().unwrap(), SecurityMode::TlsAuto);
        assert_eq!(
            "tls-version:TLSv1.4".parse::<SecurityMode>().unwrap(),
            SecurityMode::TlsVersion("TLSv1.4".into())
        );
        assert!("tls-version:".parse::<SecurityMode>().is_err());
        assert!("ssl".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn test_parse_destination() {
        assert_eq!(
            parse_destination("voice.example.com:9000").unwrap(),
            ("voice.example.com".to_string(), 9000)
        );
        assert_eq!(parse_destination("[::1]:8080").unwrap(), ("::1".to_string(), 8080));
        assert!(parse_destination("no-port").is_err());
        assert!(parse_destination(":8080").is_err());
        assert!(parse_destination("host:99999").is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [call]
            address = "voice.example.com"
            ssl = true
            tls_version = "TLSv1.3"
            client_id = "station-7"

            [audio]
            sample_rate = 48000
            "#,
        )
        .unwrap();

        let session = config.session_config().unwrap();
        assert_eq!(session.address, "voice.example.com");
        assert_eq!(session.port, DEFAULT_PORT);
        assert_eq!(session.security, SecurityMode::TlsVersion("TLSv1.3".into()));
        assert_eq!(session.client_id, b"station-7");
        assert_eq!(session.format.sample_rate, 48000);
        assert_eq!(session.format.channels, DEFAULT_CHANNELS);
        assert!(!session.debug);
    }

    #[test]
    fn test_debug_flag_reaches_session_config() {
        let config = AppConfig::from_toml_str("[call]\ndebug = true\n").unwrap();
        assert!(config.session_config().unwrap().debug);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.call.port = 9443;
        config.audio.output_device = Some("Headset".into());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.call.port, 9443);
        assert_eq!(loaded.audio.output_device.as_deref(), Some("Headset"));
    }

    proptest! {
        #[test]
        fn prop_security_mode_display_parses_back(version in "[A-Za-z0-9.]{1,12}") {
            let mode = SecurityMode::TlsVersion(version);
            let parsed: SecurityMode = mode.to_string().parse().unwrap();
            prop_assert_eq!(parsed, mode);
        }

        #[test]
        fn prop_frame_duration_is_monotonic(bytes in 0usize..100_000, extra in 1usize..10_000) {
            let format = PcmFormat::default();
            prop_assert!(format.duration_of(bytes) <= format.duration_of(bytes + extra));
        }
    }
}
