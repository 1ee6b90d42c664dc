//! TLS client configuration

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, SupportedProtocolVersion};
use tokio_rustls::TlsConnector;

use crate::config::SecurityMode;
use crate::error::ConnectError;

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Protocol versions allowed for `mode`.
///
/// Pinned names follow the usual `TLSv1.x` spelling; `TLS` allows every
/// version the library supports.
pub fn protocol_versions(
    mode: &SecurityMode,
) -> Result<&'static [&'static SupportedProtocolVersion], ConnectError> {
    match mode {
        SecurityMode::Plain | SecurityMode::TlsAuto => Ok(rustls::DEFAULT_VERSIONS),
        SecurityMode::TlsVersion(name) => {
            let name = name.trim();
            if name.eq_ignore_ascii_case("TLS") {
                Ok(rustls::ALL_VERSIONS)
            } else if name.eq_ignore_ascii_case("TLSv1.2") {
                Ok(TLS12_ONLY)
            } else if name.eq_ignore_ascii_case("TLSv1.3") {
                Ok(TLS13_ONLY)
            } else {
                Err(ConnectError::UnsupportedTlsVersion(name.to_string()))
            }
        }
    }
}

/// Platform trust store plus any anchors from `ca_file`
pub fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore, ConnectError> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::debug!("Skipping platform certificate: {}", error);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!("Loaded {} platform trust anchors ({} ignored)", added, ignored);

    if added == 0 {
        tracing::debug!("No platform trust anchors, using bundled webpki roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    if let Some(path) = ca_file {
        for cert in load_certificates(path)? {
            roots
                .add(cert)
                .map_err(|e| ConnectError::TrustStore(format!("{}: {}", path.display(), e)))?;
        }
    }

    Ok(roots)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    let file = File::open(path)
        .map_err(|e| ConnectError::TrustStore(format!("{}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::TrustStore(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(ConnectError::TrustStore(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

/// Build a connector for `mode`; fails before any socket is opened if the
/// requested version is not available
pub fn build_connector(
    mode: &SecurityMode,
    ca_file: Option<&Path>,
) -> Result<TlsConnector, ConnectError> {
    let versions = protocol_versions(mode)?;
    let config = ClientConfig::builder_with_protocol_versions(versions)
        .with_root_certificates(root_store(ca_file)?)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// TLS server name for a destination host or IP address
pub fn server_name(address: &str) -> Result<ServerName<'static>, ConnectError> {
    ServerName::try_from(address.to_string())
        .map_err(|_| ConnectError::InvalidServerName(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectErrorKind;

    #[test]
    fn test_pinned_versions() {
        let tls12 = protocol_versions(&SecurityMode::TlsVersion("TLSv1.2".into())).unwrap();
        assert_eq!(tls12.len(), 1);
        assert_eq!(tls12[0].version, rustls::ProtocolVersion::TLSv1_2);

        let tls13 = protocol_versions(&SecurityMode::TlsVersion("tlsv1.3".into())).unwrap();
        assert_eq!(tls13[0].version, rustls::ProtocolVersion::TLSv1_3);

        assert_eq!(
            protocol_versions(&SecurityMode::TlsVersion("TLS".into())).unwrap().len(),
            rustls::ALL_VERSIONS.len()
        );
    }

    #[test]
    fn test_unknown_version_is_unsupported() {
        for name in ["TLSv1.4", "TLSv1.1", "SSLv3"] {
            let err = protocol_versions(&SecurityMode::TlsVersion(name.into())).unwrap_err();
            assert_eq!(err.kind(), ConnectErrorKind::TlsUnsupported);
        }
    }

    #[test]
    fn test_server_names() {
        assert!(matches!(server_name("127.0.0.1").unwrap(), ServerName::IpAddress(_)));
        assert!(matches!(server_name("voice.example.com").unwrap(), ServerName::DnsName(_)));
        assert!(server_name("not a host").is_err());
    }

    #[test]
    fn test_missing_ca_file() {
        let err = root_store(Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(matches!(err, ConnectError::TrustStore(_)));
    }

    #[test]
    fn test_ca_file_without_certificates() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not a certificate\n").unwrap();
        let err = root_store(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConnectError::TrustStore(_)));
    }
}
