//! Network subsystem: TCP/TLS transport to the voice server

pub mod tls;
pub mod transport;

pub use transport::{ByteStream, Transport, TransportReader, TransportWriter};
