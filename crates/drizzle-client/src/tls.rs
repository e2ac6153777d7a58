//! TLS upgrade for connections, using rustls.
//!
//! # Handshake flow
//!
//! 1. Server greeting advertises `CLIENT_SSL`
//! 2. Client sends the short SSL request packet:
//!    - 4 bytes: capability flags (with `CLIENT_SSL`)
//!    - 4 bytes: max packet size
//!    - 1 byte: character set
//!    - 23 bytes: reserved (zeros)
//! 3. Client performs the TLS handshake on the raw stream
//! 4. The handshake response and everything after it travel over TLS
//!
//! TLS requires the `tls` feature; without it, requesting TLS fails at
//! connect time with a transport error.

use drizzle_core::Result;
use drizzle_core::error::{AuthErrorKind, TransportErrorKind};

use crate::config::{SslMode, TlsConfig};
use crate::error::{auth, config, transport};
use crate::protocol::{PacketWriter, capabilities};

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Build the SSL request payload.
pub fn build_ssl_request(client_caps: u32, max_packet_size: u32, character_set: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(character_set);
    writer.write_zeros(23);
    writer.into_bytes()
}

/// Check if the server supports SSL/TLS.
pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Decide whether to upgrade, given the SSL mode and server capabilities.
///
/// Fails with `AuthError{Capability}` when TLS is required but the server
/// does not offer it.
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    let server_supports = server_supports_ssl(server_caps);

    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(auth(
                    AuthErrorKind::Capability,
                    "SSL required but server does not support it",
                ))
            }
        }
    }
}

/// Validate TLS configuration for the given SSL mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<()> {
    if tls_config.client_cert_path.is_some() != tls_config.client_key_path.is_some() {
        return Err(config(
            "client certificate and client key must be set together for mutual TLS",
        ));
    }
    if matches!(ssl_mode, SslMode::VerifyCa | SslMode::VerifyIdentity)
        && tls_config.ca_cert_path.is_none()
        && !tls_config.danger_skip_verify
    {
        return Err(config(
            "CA certificate required for VerifyCa/VerifyIdentity mode; \
             set ca_cert_path or skip_verify",
        ));
    }
    Ok(())
}

fn tls_error(message: impl Into<String>) -> drizzle_core::Error {
    transport(TransportErrorKind::Tls, message)
}

/// TLS connection wrapper using rustls.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Wrap a connected stream and run the TLS handshake to completion.
    pub fn new(
        mut stream: S,
        tls_config: &TlsConfig,
        server_name: &str,
        ssl_mode: SslMode,
    ) -> Result<Self> {
        let client_config = build_client_config(tls_config, ssl_mode)?;

        let sni_name = tls_config.server_name.as_deref().unwrap_or(server_name);
        let server_name = sni_name
            .to_string()
            .try_into()
            .map_err(|e| tls_error(format!("invalid server name '{}': {}", sni_name, e)))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(client_config), server_name)
            .map_err(|e| tls_error(format!("failed to create TLS connection: {}", e)))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {}", e)))?;
            }
            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {}", e)))?;
                if n == 0 {
                    return Err(tls_error("server closed the connection during TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {}", e)))?;
            }
        }

        tracing::debug!(version = ?conn.protocol_version(), "TLS established");
        Ok(TlsStream { conn, stream })
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Check if the connection is using TLS 1.3.
    pub fn is_tls13(&self) -> bool {
        self.conn.protocol_version() == Some(rustls::ProtocolVersion::TLSv1_3)
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if self.conn.wants_read() {
                let n = self.conn.read_tls(&mut self.stream)?;
                if n == 0 {
                    return Ok(0);
                }
                self.conn
                    .process_new_packets()
                    .map_err(|e| std::io::Error::other(format!("TLS error: {}", e)))?;
            } else {
                return Ok(0);
            }
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
fn build_client_config(tls_config: &TlsConfig, ssl_mode: SslMode) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    if tls_config.danger_skip_verify {
        return build_no_verify_config(&provider);
    }
    match (ssl_mode, &tls_config.ca_cert_path) {
        (SslMode::Disable, _) => Err(tls_error("TLS requested with SslMode::Disable")),
        (_, Some(ca_path)) => build_custom_ca_config(&provider, tls_config, ca_path),
        (_, None) => build_webpki_config(&provider, tls_config),
    }
}

/// A ClientConfig that accepts any server certificate.
#[cfg(feature = "tls")]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct NoVerifier(Vec<SignatureScheme>);

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.clone()
        }
    }

    let schemes = provider
        .signature_verification_algorithms
        .supported_schemes();

    tracing::warn!("TLS certificate verification is disabled");
    Ok(
        rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| tls_error(format!("failed to set TLS versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(schemes)))
            .with_no_client_auth(),
    )
}

#[cfg(feature = "tls")]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
    ca_path: &std::path::Path,
) -> Result<rustls::ClientConfig> {
    let certs = load_certs(ca_path, "CA certificate")?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| tls_error(format!("failed to add CA certificate: {}", e)))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn load_certs(
    path: &std::path::Path,
    what: &str,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| tls_error(format!("failed to open {} '{}': {}", what, path.display(), e)))?;
    let mut reader = std::io::BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("failed to parse {}: {}", what, e)))?;

    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates found in {} '{}'",
            what,
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };

    let certs = load_certs(cert_path, "client certificate")?;

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        tls_error(format!(
            "failed to open client key '{}': {}",
            key_path.display(),
            e
        ))
    })?;
    let mut key_reader = std::io::BufReader::new(key_file);

    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| tls_error(format!("failed to parse client key: {}", e)))?
        .ok_or_else(|| tls_error(format!("no private key found in '{}'", key_path.display())))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("failed to configure client auth: {}", e)))
}

/// Placeholder when the `tls` feature is disabled.
#[cfg(not(feature = "tls"))]
#[derive(Debug)]
pub struct TlsStream<S> {
    #[allow(dead_code)]
    inner: S,
}

#[cfg(not(feature = "tls"))]
impl<S> TlsStream<S> {
    /// Always fails: TLS support is compiled out.
    #[allow(unused_variables)]
    pub fn new(
        stream: S,
        tls_config: &TlsConfig,
        server_name: &str,
        ssl_mode: SslMode,
    ) -> Result<Self> {
        Err(tls_error(
            "TLS support requires the 'tls' feature of drizzle-client",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;

    #[test]
    fn test_build_ssl_request() {
        let payload = build_ssl_request(
            capabilities::DEFAULT_CLIENT_FLAGS,
            16 * 1024 * 1024,
            charset::DEFAULT_CHARSET,
        );
        assert_eq!(payload.len(), 32);
        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
        assert_eq!(payload[8], charset::DEFAULT_CHARSET);
        assert!(payload[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate_ssl_mode() {
        assert!(!validate_ssl_mode(SslMode::Disable, capabilities::CLIENT_SSL).unwrap());
        assert!(!validate_ssl_mode(SslMode::Preferred, 0).unwrap());
        assert!(validate_ssl_mode(SslMode::Preferred, capabilities::CLIENT_SSL).unwrap());
        assert!(validate_ssl_mode(SslMode::VerifyIdentity, capabilities::CLIENT_SSL).unwrap());

        let err = validate_ssl_mode(SslMode::Required, 0).unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::Capability));
    }

    #[test]
    fn test_validate_tls_config() {
        assert!(validate_tls_config(SslMode::Required, &TlsConfig::new()).is_ok());
        assert!(validate_tls_config(SslMode::VerifyCa, &TlsConfig::new()).is_err());
        assert!(
            validate_tls_config(SslMode::VerifyCa, &TlsConfig::new().ca_cert("/ca.pem")).is_ok()
        );
        assert!(
            validate_tls_config(SslMode::VerifyCa, &TlsConfig::new().skip_verify(true)).is_ok()
        );

        let half = TlsConfig::new().ca_cert("/ca.pem").client_cert("/client.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &half).is_err());
        let full = half.client_key("/client-key.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &full).is_ok());
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_tls_disabled_reports_transport_error() {
        let err = TlsStream::new((), &TlsConfig::new(), "localhost", SslMode::Required).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Tls));
    }
}
