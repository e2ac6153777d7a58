//! Byte transports: TCP, Unix domain sockets, and TLS over TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use drizzle_core::Result;
use drizzle_core::error::TransportErrorKind;

use crate::config::ClientConfig;
use crate::error::{map_io, transport};
use crate::tls::TlsStream;

/// An open byte stream to the server.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Open the transport described by `config`.
    ///
    /// A configured socket path wins over host and port. TCP resolves the
    /// host and tries each address in turn with the connect timeout.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        if let Some(path) = &config.socket {
            return Self::connect_unix(config, path);
        }

        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                transport(
                    TransportErrorKind::Resolve,
                    format!("failed to resolve '{}': {}", config.host, e),
                )
            })?;

        let mut last_err = None;
        for addr in addrs {
            tracing::trace!(%addr, "connecting");
            let attempt = match config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(|e| map_io(e, "set_nodelay"))?;
                    stream
                        .set_read_timeout(config.read_timeout)
                        .map_err(|e| map_io(e, "set_read_timeout"))?;
                    stream
                        .set_write_timeout(config.write_timeout)
                        .map_err(|e| map_io(e, "set_write_timeout"))?;
                    return Ok(Transport::Tcp(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => map_io(e, "connect"),
            None => transport(
                TransportErrorKind::Resolve,
                format!("'{}' resolved to no addresses", config.host),
            ),
        })
    }

    #[cfg(unix)]
    fn connect_unix(config: &ClientConfig, path: &std::path::Path) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|e| map_io(e, "connect"))?;
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(|e| map_io(e, "set_read_timeout"))?;
        stream
            .set_write_timeout(config.write_timeout)
            .map_err(|e| map_io(e, "set_write_timeout"))?;
        Ok(Transport::Unix(stream))
    }

    #[cfg(not(unix))]
    fn connect_unix(_config: &ClientConfig, path: &std::path::Path) -> Result<Self> {
        Err(crate::error::config(format!(
            "Unix socket '{}' is not supported on this platform",
            path.display()
        )))
    }

    /// Whether a password may travel in the clear on this transport.
    pub fn is_secure(&self) -> bool {
        match self {
            Transport::Tcp(_) => false,
            #[cfg(unix)]
            Transport::Unix(_) => true,
            #[cfg(feature = "tls")]
            Transport::Tls(_) => true,
        }
    }

    pub fn is_tls(&self) -> bool {
        match self {
            #[cfg(feature = "tls")]
            Transport::Tls(_) => true,
            _ => false,
        }
    }

    /// Upgrade a TCP transport to TLS.
    pub fn upgrade_tls(self, config: &ClientConfig) -> Result<Self> {
        let ssl_mode = config.effective_ssl_mode();
        match self {
            #[cfg(feature = "tls")]
            Transport::Tcp(stream) => {
                let tls = TlsStream::new(stream, &config.tls_config, &config.host, ssl_mode)?;
                Ok(Transport::Tls(Box::new(tls)))
            }
            #[cfg(not(feature = "tls"))]
            Transport::Tcp(stream) => {
                TlsStream::new(stream, &config.tls_config, &config.host, ssl_mode)?;
                Err(transport(
                    TransportErrorKind::Tls,
                    "TLS support is not compiled in",
                ))
            }
            _ => Err(transport(
                TransportErrorKind::Tls,
                "TLS upgrade is only possible on a TCP connection",
            )),
        }
    }

    /// Close both directions. Errors are ignored; the peer may be gone.
    pub fn shutdown(&self) {
        let result = match self {
            Transport::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Transport::Unix(s) => s.shutdown(Shutdown::Both),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.get_ref().shutdown(Shutdown::Both),
        };
        if let Err(e) = result {
            tracing::trace!(error = %e, "transport shutdown failed");
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Transport::Unix(s) => s.flush(),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn connect_refused_maps_to_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = ClientConfig::new()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout(Duration::from_secs(2));
        let err = Transport::connect(&config).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Refused));
        assert!(err.is_retryable());
    }

    #[test]
    fn connect_tcp_and_exchange_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"hi").unwrap();
        });

        let config = ClientConfig::new().host("127.0.0.1").port(port);
        let mut transport = Transport::connect(&config).unwrap();
        assert!(!transport.is_secure());
        assert!(!transport.is_tls());
        let mut buf = [0u8; 2];
        transport.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        transport.shutdown();
        server.join().unwrap();
    }

    #[test]
    fn unresolvable_host() {
        let config = ClientConfig::new().host("no-such-host.invalid").port(4427);
        let err = Transport::connect(&config).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Resolve));
    }

    #[cfg(unix)]
    #[test]
    fn unix_socket_is_secure() {
        let dir = std::env::temp_dir().join(format!("drizzle-transport-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sock");
        let _ = std::fs::remove_file(&path);
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let config = ClientConfig::new().socket(&path);
        let transport = Transport::connect(&config).unwrap();
        assert!(transport.is_secure());
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
