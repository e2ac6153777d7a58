//! Error mapping.
//!
//! Turns OS-level I/O failures, server ERR packets and local misuse into
//! the closed `drizzle_core::Error` taxonomy. Diagnostic text is carried
//! through unchanged.

use std::io;

use drizzle_core::error::{
    AuthError, AuthErrorKind, ConfigError, Error, InvalidStateError, ProtocolError,
    ProtocolErrorKind, ServerError, TransportError, TransportErrorKind,
};

use crate::protocol::ErrPacket;

/// Classify an I/O failure.
///
/// `context` names what the client was doing ("connect", "read packet"),
/// and is only used for the log line; the error message stays the OS text.
pub(crate) fn map_io(err: io::Error, context: &str) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            return truncated(format!("{context}: {err}"));
        }
        io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportErrorKind::Reset,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        io::ErrorKind::NotConnected => TransportErrorKind::Closed,
        io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable => TransportErrorKind::Resolve,
        _ => TransportErrorKind::Io,
    };
    tracing::debug!(context, kind = kind.as_str(), error = %err, "transport failure");
    Error::Transport(TransportError {
        kind,
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

pub(crate) fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Error {
    Error::Transport(TransportError {
        kind,
        message: message.into(),
        source: None,
    })
}

pub(crate) fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        kind,
        message: message.into(),
        raw_data: None,
    })
}

pub(crate) fn truncated(message: impl Into<String>) -> Error {
    protocol(ProtocolErrorKind::Truncated, message)
}

/// A packet that could not be parsed. The payload is kept for diagnostics.
pub(crate) fn bad_packet(what: &str, payload: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        kind: ProtocolErrorKind::BadPacket,
        message: format!("malformed {what} packet ({} bytes)", payload.len()),
        raw_data: Some(payload.to_vec()),
    })
}

/// A well-formed packet of the wrong kind for the current exchange.
pub(crate) fn unexpected_packet(expected: &str, payload: &[u8]) -> Error {
    let marker = payload
        .first()
        .map_or_else(|| "empty".to_string(), |b| format!("0x{b:02X}"));
    Error::Protocol(ProtocolError {
        kind: ProtocolErrorKind::UnexpectedPacket,
        message: format!("expected {expected}, got packet starting with {marker}"),
        raw_data: Some(payload.to_vec()),
    })
}

/// A server ERR packet answering a command.
pub(crate) fn server_error(err: ErrPacket, sql: Option<&[u8]>) -> Error {
    Error::Server(ServerError {
        code: err.error_code,
        sqlstate: err.sql_state,
        message: err.error_message,
        sql: sql.map(|s| String::from_utf8_lossy(s).into_owned()),
    })
}

/// A server ERR packet during authentication.
pub(crate) fn auth_rejected(err: ErrPacket) -> Error {
    Error::Auth(AuthError {
        kind: AuthErrorKind::Rejected,
        message: err.error_message,
        code: Some(err.error_code),
        sqlstate: err.sql_state,
    })
}

pub(crate) fn auth(kind: AuthErrorKind, message: impl Into<String>) -> Error {
    Error::Auth(AuthError {
        kind,
        message: message.into(),
        code: None,
        sqlstate: None,
    })
}

pub(crate) fn invalid_state(
    operation: &'static str,
    state: &'static str,
    message: impl Into<String>,
) -> Error {
    Error::InvalidState(InvalidStateError {
        operation,
        state,
        message: message.into(),
    })
}

pub(crate) fn config(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
        source: None,
    })
}
