//! Core types for the drizzle-rs wire client.
//!
//! This crate provides the protocol-independent pieces shared by the client:
//!
//! - `Error` and its closed taxonomy (transport, protocol, auth, server,
//!   invalid state)
//! - `Value` for dynamically-typed column values
//! - `Row` with index and name based access

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    AuthError, AuthErrorKind, ConfigError, Error, InvalidStateError, ProtocolError,
    ProtocolErrorKind, Result, ServerError, TransportError, TransportErrorKind, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
