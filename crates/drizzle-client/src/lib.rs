//! Blocking client for the Drizzle/MySQL wire protocol.
//!
//! This crate implements the client side of the protocol from scratch
//! over std sockets. It provides:
//!
//! - Packet framing with sequence numbers and multi-frame payloads
//! - The v10 handshake with capability negotiation and optional TLS
//! - Authentication (mysql_native_password, caching_sha2_password,
//!   sha256_password, mysql_clear_password), including auth switches
//! - Text queries with streamed result sets and multi-result support
//! - Prepared statements over the binary protocol
//! - A connection state machine that rejects misuse before any I/O
//!
//! # Protocol Overview
//!
//! Every message is a packet: a 3-byte payload length, a 1-byte sequence
//! number, then the payload. Payloads of 16MB or more are split across
//! frames. Each command restarts the sequence at 0.
//!
//! # Example
//!
//! ```rust,ignore
//! use drizzle_client::{ClientConfig, Connection};
//!
//! let config = ClientConfig::new()
//!     .host("localhost")
//!     .user("app")
//!     .password("secret")
//!     .database("shop");
//!
//! let mut conn = Connection::open(config)?;
//! let rows = conn.query("SELECT id, name FROM items")?.collect_rows()?;
//! for row in &rows {
//!     let id: i64 = row.get_as(0)?;
//!     let name: String = row.get_named("name")?;
//!     println!("{id}: {name}");
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
mod error;
pub mod handshake;
pub mod protocol;
pub mod result;
pub mod tls;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{ClientConfig, ConnectionOption, SslMode, TlsConfig};
pub use connection::{Connection, ConnectionState};
pub use drizzle_core::{ColumnInfo, Error, FromValue, Result, Row, Value};
pub use handshake::{HandshakeInfo, HandshakeState};
pub use protocol::PreparedStatement;
pub use result::{Completion, QueryResult, ResultSet};
pub use types::{Column, ColumnType};

/// Connect to `host:port` with the given option flags and default
/// credentials.
///
/// Use [`ClientConfig`] and [`Connection::open`] for anything beyond
/// this.
#[allow(clippy::result_large_err)]
pub fn connect(
    host: impl Into<String>,
    port: u16,
    options: impl IntoIterator<Item = ConnectionOption>,
) -> Result<Connection> {
    let mut config = ClientConfig::new().host(host).port(port);
    config.options.extend(options);
    Connection::open(config)
}
