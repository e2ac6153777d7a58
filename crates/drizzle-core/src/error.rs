//! Error types for wire client operations.
//!
//! Failures fall into a small closed taxonomy. Each variant carries a `kind`
//! plus the diagnostic text exactly as it was produced (by the OS, the
//! server or the client), so callers can log the original message while
//! branching on the kind.

use std::fmt;

/// The primary error type for all client operations.
#[derive(Debug)]
pub enum Error {
    /// Transport failures (connect refused, reset, timeout). The connection
    /// is closed; callers may retry at the connect level.
    Transport(TransportError),
    /// Malformed or unexpected frames, sequence desynchronization. The
    /// connection is closed and must be re-established.
    Protocol(ProtocolError),
    /// Credential or capability negotiation failure. Terminal for the
    /// connect attempt.
    Auth(AuthError),
    /// Error reported by the server for a command. The connection remains
    /// usable.
    Server(ServerError),
    /// Caller misuse: an operation issued in a state that does not allow it.
    InvalidState(InvalidStateError),
    /// Invalid client configuration
    Config(ConfigError),
    /// Value conversion errors
    Type(TypeError),
}

#[derive(Debug)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The server refused the connection
    Refused,
    /// The connection was reset or aborted by the peer
    Reset,
    /// A connect, read or write deadline expired
    Timeout,
    /// The peer closed the stream
    Closed,
    /// The host name could not be resolved
    Resolve,
    /// TLS negotiation failed
    Tls,
    /// Any other I/O failure
    Io,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The stream ended in the middle of a frame
    Truncated,
    /// A frame arrived with an unexpected sequence number
    SequenceMismatch,
    /// The server speaks a protocol version this client does not know
    UnsupportedProtocolVersion,
    /// A packet could not be parsed
    BadPacket,
    /// A well-formed packet arrived where another kind was expected
    UnexpectedPacket,
    /// A packet exceeded the configured maximum size
    PacketTooLarge,
}

#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    /// Server error code when the server rejected the credentials
    pub code: Option<u16>,
    pub sqlstate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The server rejected the credentials
    Rejected,
    /// The server asked for an authentication plugin this client lacks
    UnsupportedPlugin,
    /// The greeting carried no usable scramble
    NoScramble,
    /// Full authentication would expose the password on an insecure channel
    InsecureTransport,
    /// Client and server could not agree on required capabilities
    Capability,
    /// Encrypting the password with the server's key failed
    Encryption,
}

#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
    /// The statement that triggered the error, when known
    pub sql: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvalidStateError {
    /// The rejected operation
    pub operation: &'static str,
    /// The connection state at the time of the call
    pub state: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Does this error leave the connection unusable?
    ///
    /// Transport, protocol and authentication failures close the connection;
    /// server errors, misuse and conversion errors do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Protocol(_) | Error::Auth(_)
        )
    }

    /// Is this a transient failure that a caller-side retry may fix?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(t) => matches!(
                t.kind,
                TransportErrorKind::Refused
                    | TransportErrorKind::Reset
                    | TransportErrorKind::Timeout
                    | TransportErrorKind::Closed
            ),
            _ => false,
        }
    }

    /// Is this an `InvalidState` error?
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }

    /// Is this a transport timeout?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(t) if t.kind == TransportErrorKind::Timeout)
    }

    /// Server (or auth rejection) error code, if any.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(s) => Some(s.code),
            Error::Auth(a) => a.code,
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(s) => s.sqlstate.as_deref(),
            Error::Auth(a) => a.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// The SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Server(s) => s.sql.as_deref(),
            _ => None,
        }
    }

    /// The original diagnostic text, without any prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Transport(e) => &e.message,
            Error::Protocol(e) => &e.message,
            Error::Auth(e) => &e.message,
            Error::Server(e) => &e.message,
            Error::InvalidState(e) => &e.message,
            Error::Config(e) => &e.message,
            Error::Type(e) => &e.actual,
        }
    }

    pub fn protocol_kind(&self) -> Option<ProtocolErrorKind> {
        match self {
            Error::Protocol(p) => Some(p.kind),
            _ => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Error::Transport(t) => Some(t.kind),
            _ => None,
        }
    }

    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            Error::Auth(a) => Some(a.kind),
            _ => None,
        }
    }
}

impl ServerError {
    /// ER_DUP_ENTRY
    pub fn is_duplicate_key(&self) -> bool {
        self.code == 1062
    }

    /// ER_ROW_IS_REFERENCED_2 / ER_NO_REFERENCED_ROW_2
    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == 1451 || self.code == 1452
    }

    /// ER_PARSE_ERROR
    pub fn is_syntax_error(&self) -> bool {
        self.code == 1064
    }

    /// ER_BAD_DB_ERROR
    pub fn is_unknown_database(&self) -> bool {
        self.code == 1049
    }
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Refused => "refused",
            TransportErrorKind::Reset => "reset",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Closed => "closed",
            TransportErrorKind::Resolve => "resolve",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Io => "io",
        }
    }
}

impl ProtocolErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProtocolErrorKind::Truncated => "truncated",
            ProtocolErrorKind::SequenceMismatch => "sequence mismatch",
            ProtocolErrorKind::UnsupportedProtocolVersion => "unsupported protocol version",
            ProtocolErrorKind::BadPacket => "bad packet",
            ProtocolErrorKind::UnexpectedPacket => "unexpected packet",
            ProtocolErrorKind::PacketTooLarge => "packet too large",
        }
    }
}

impl AuthErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuthErrorKind::Rejected => "rejected",
            AuthErrorKind::UnsupportedPlugin => "unsupported plugin",
            AuthErrorKind::NoScramble => "no scramble",
            AuthErrorKind::InsecureTransport => "insecure transport",
            AuthErrorKind::Capability => "capability",
            AuthErrorKind::Encryption => "encryption",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error ({}): {}", e.kind.as_str(), e.message),
            Error::Protocol(e) => write!(f, "Protocol error ({}): {}", e.kind.as_str(), e.message),
            Error::Auth(e) => match e.code {
                Some(code) => write!(
                    f,
                    "Authentication error ({}, code {}): {}",
                    e.kind.as_str(),
                    code,
                    e.message
                ),
                None => write!(f, "Authentication error ({}): {}", e.kind.as_str(), e.message),
            },
            Error::Server(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(
                        f,
                        "Server error {} (SQLSTATE {}): {}",
                        e.code, sqlstate, e.message
                    )
                } else {
                    write!(f, "Server error {}: {}", e.code, e.message)
                }
            }
            Error::InvalidState(e) => write!(
                f,
                "Invalid state: cannot {} while {}: {}",
                e.operation, e.state, e.message
            ),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} ({}, SQLSTATE {})", self.message, self.code, sqlstate)
        } else {
            write!(f, "{} ({})", self.message, self.code)
        }
    }
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<InvalidStateError> for Error {
    fn from(err: InvalidStateError) -> Self {
        Error::InvalidState(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
