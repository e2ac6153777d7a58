//! Connection state machine.
//!
//! ```text
//! Unconnected -> Connecting -> Handshaking -> Ready <-> Querying
//!                                  |            |          |
//!                                  +------------+----------+--> Error -> Closed
//! ```
//!
//! A connection runs one command at a time. Any command issued while the
//! state is not `Ready` (an open result set, unread multi-statement
//! results, or no connection at all) fails with `InvalidState` before a
//! byte is written. Transport, protocol and auth failures are fatal: the
//! connection passes through `Error` while the transport is torn down and
//! settles in `Closed`. Server ERR packets are not fatal and leave the
//! connection `Ready`.

#![allow(clippy::cast_possible_truncation)]

use std::path::PathBuf;
use std::sync::Arc;

use drizzle_core::{ColumnInfo, Error, Result, Value};

use crate::config::{ClientConfig, ConnectionOption};
use crate::error::{bad_packet, invalid_state, server_error, unexpected_packet};
use crate::handshake::{Handshake, HandshakeInfo};
use crate::protocol::{
    Command, PacketReader, PacketStream, PacketType, PacketWriter, PreparedStatement,
    build_stmt_close_packet, build_stmt_execute_packet, build_stmt_prepare_packet, capabilities,
    parse_stmt_prepare_ok, server_status,
};
use crate::result::{Completion, QueryResult, ResultSet, RowFormat};
use crate::transport::Transport;
use crate::types::{Column, column_info, decode_binary_row, decode_text_row};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created or reset, no transport
    #[default]
    Unconnected,
    /// Opening the transport
    Connecting,
    /// Greeting and authentication in progress
    Handshaking,
    /// Idle, accepting commands
    Ready,
    /// A command's response is still being read
    Querying,
    /// A fatal failure is being handled
    Error,
    /// Transport released
    Closed,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Querying => "querying",
            ConnectionState::Error => "error",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Column metadata of the result set currently on the wire.
#[derive(Debug, Clone)]
struct OpenResult {
    columns: Arc<[Column]>,
    column_info: Arc<ColumnInfo>,
    format: RowFormat,
}

/// Response data the connection still has to read.
#[derive(Debug, Clone, Default)]
enum Pending {
    #[default]
    Nothing,
    /// Rows of an open result set
    Rows(OpenResult),
    /// Another result follows the one just finished
    MoreResults(RowFormat),
}

/// First response to a command, before it is bound to a `ResultSet`.
enum Response {
    Done(Completion),
    Rows(OpenResult),
}

/// A blocking client connection.
pub struct Connection {
    config: ClientConfig,
    state: ConnectionState,
    stream: Option<PacketStream<Transport>>,
    info: Option<HandshakeInfo>,
    pending: Pending,
    /// SQL of the command being answered, attached to server errors
    current_sql: Option<Vec<u8>>,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    last_completion: Option<Completion>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("endpoint", &self.config.endpoint())
            .field("database", &self.config.database)
            .field("connection_id", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create an unconnected handle.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Unconnected,
            stream: None,
            info: None,
            pending: Pending::Nothing,
            current_sql: None,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            last_completion: None,
        }
    }

    /// Create a handle and connect it.
    #[allow(clippy::result_large_err)]
    pub fn open(config: ClientConfig) -> Result<Self> {
        let mut conn = Self::new(config);
        conn.connect()?;
        Ok(conn)
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn database(&self) -> Option<&str> {
        self.config.database.as_deref()
    }

    pub fn options(&self) -> impl Iterator<Item = ConnectionOption> + '_ {
        self.config.options.iter().copied()
    }

    pub fn handshake_info(&self) -> Option<&HandshakeInfo> {
        self.info.as_ref()
    }

    pub fn server_version(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.server_version.as_str())
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.info.as_ref().map(|i| i.connection_id)
    }

    /// Status flags from the most recent OK or EOF packet.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    pub(crate) fn last_completion(&self) -> Option<&Completion> {
        self.last_completion.as_ref()
    }

    // ==================== Pre-connect setters ====================

    fn ensure_unconnected(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ConnectionState::Unconnected | ConnectionState::Closed => Ok(()),
            state => Err(invalid_state(
                operation,
                state.as_str(),
                "connection parameters can only change while disconnected",
            )),
        }
    }

    /// Use TCP to `host:port`.
    #[allow(clippy::result_large_err)]
    pub fn set_tcp(&mut self, host: impl Into<String>, port: u16) -> Result<()> {
        self.ensure_unconnected("set_tcp")?;
        self.config.host = host.into();
        self.config.port = port;
        self.config.socket = None;
        Ok(())
    }

    /// Use a Unix domain socket.
    #[allow(clippy::result_large_err)]
    pub fn set_unix_socket(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.ensure_unconnected("set_unix_socket")?;
        self.config.socket = Some(path.into());
        Ok(())
    }

    /// Database selected during the handshake.
    #[allow(clippy::result_large_err)]
    pub fn set_default_database(&mut self, name: impl Into<String>) -> Result<()> {
        self.ensure_unconnected("set_default_database")?;
        self.config.database = Some(name.into());
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn set_auth(&mut self, user: impl Into<String>, password: Option<String>) -> Result<()> {
        self.ensure_unconnected("set_auth")?;
        self.config.user = user.into();
        self.config.password = password;
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn add_option(&mut self, option: ConnectionOption) -> Result<()> {
        self.ensure_unconnected("add_option")?;
        self.config.options.insert(option);
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn remove_option(&mut self, option: ConnectionOption) -> Result<()> {
        self.ensure_unconnected("remove_option")?;
        self.config.options.remove(&option);
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Open the transport and authenticate.
    ///
    /// Valid from `Unconnected` or `Closed`. On failure the transport is
    /// released and the connection is `Closed`.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self), fields(endpoint = %self.config.endpoint(), user = %self.config.user))]
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_unconnected("connect")?;
        self.reset_session();

        self.transition(ConnectionState::Connecting);
        let transport = match Transport::connect(&self.config) {
            Ok(t) => t,
            Err(e) => {
                self.transition(ConnectionState::Closed);
                return Err(e);
            }
        };

        self.transition(ConnectionState::Handshaking);
        let stream = PacketStream::new(transport, self.config.max_packet_size as usize);
        let (stream, info) = match Handshake::new(&self.config).run(stream) {
            Ok(done) => done,
            Err(e) => {
                tracing::debug!(error = %e, "handshake failed");
                self.transition(ConnectionState::Closed);
                return Err(e);
            }
        };

        tracing::debug!(
            server_version = %info.server_version,
            connection_id = info.connection_id,
            auth_plugin = %info.auth_plugin,
            tls = info.tls,
            "connected"
        );
        self.status_flags = info.status_flags;
        let connect_with_db = info.has_capability(capabilities::CLIENT_CONNECT_WITH_DB);
        self.stream = Some(stream);
        self.info = Some(info);
        self.transition(ConnectionState::Ready);

        // Servers without CONNECT_WITH_DB get the database afterwards.
        if let Some(db) = self.config.database.clone() {
            if !connect_with_db {
                if let Err(e) = self.set_database(&db) {
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Send COM_QUIT and release the transport.
    ///
    /// Always succeeds; a second call does nothing.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.write_command(&[Command::Quit as u8]) {
                tracing::warn!(error = %e, "failed to send quit");
            }
            stream.get_ref().shutdown();
            tracing::debug!(from = self.state.as_str(), "connection closed");
        }
        self.pending = Pending::Nothing;
        self.current_sql = None;
        self.state = ConnectionState::Closed;
    }

    fn reset_session(&mut self) {
        self.info = None;
        self.pending = Pending::Nothing;
        self.current_sql = None;
        self.status_flags = 0;
        self.affected_rows = 0;
        self.last_insert_id = 0;
        self.warnings = 0;
        self.last_completion = None;
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = self.state.as_str(), to = next.as_str(), "connection state");
            self.state = next;
        }
    }

    /// Tear down after a fatal failure and hand the error back.
    fn abort(&mut self, err: Error) -> Error {
        self.transition(ConnectionState::Error);
        tracing::debug!(error = %err, "fatal connection error");
        if let Some(stream) = self.stream.take() {
            stream.get_ref().shutdown();
        }
        self.pending = Pending::Nothing;
        self.current_sql = None;
        self.transition(ConnectionState::Closed);
        err
    }

    /// Route an operation's error: fatal errors close the connection,
    /// server errors leave it ready.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(e) if e.is_fatal() => Err(self.abort(e)),
            Err(e) => {
                if matches!(e, Error::Server(_)) {
                    self.pending = Pending::Nothing;
                    self.transition(ConnectionState::Ready);
                }
                Err(e)
            }
        }
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Querying => Err(invalid_state(
                operation,
                self.state.as_str(),
                "a previous result has not been fully read",
            )),
            state => Err(invalid_state(operation, state.as_str(), "not connected")),
        }
    }

    fn stream(&mut self) -> Result<&mut PacketStream<Transport>> {
        let state = self.state.as_str();
        self.stream
            .as_mut()
            .ok_or_else(|| invalid_state("read", state, "no transport"))
    }

    fn deprecate_eof(&self) -> bool {
        self.info
            .as_ref()
            .is_some_and(|i| i.has_capability(capabilities::CLIENT_DEPRECATE_EOF))
    }

    /// Start a command exchange: mark the connection busy and send the
    /// first packet with sequence 0.
    fn send_command(&mut self, payload: &[u8]) -> Result<()> {
        self.transition(ConnectionState::Querying);
        let result = self.stream().and_then(|s| s.write_command(payload));
        self.settle(result)
    }

    fn record_ok(&mut self, completion: &Completion) {
        self.affected_rows = completion.affected_rows;
        self.last_insert_id = completion.last_insert_id;
        self.warnings = completion.warnings;
        self.status_flags = completion.status_flags;
    }

    /// Finish the current result and decide what comes next.
    fn complete(&mut self, completion: Completion, format: RowFormat) {
        self.status_flags = completion.status_flags;
        self.warnings = completion.warnings;
        if completion.more_results() {
            self.pending = Pending::MoreResults(format);
            self.state = ConnectionState::Querying;
        } else {
            self.pending = Pending::Nothing;
            self.current_sql = None;
            self.transition(ConnectionState::Ready);
        }
        self.last_completion = Some(completion);
    }

    // ==================== Commands ====================

    /// Select the default database (COM_INIT_DB).
    #[allow(clippy::result_large_err)]
    pub fn set_database(&mut self, name: &str) -> Result<()> {
        self.ensure_ready("set_database")?;
        let mut writer = PacketWriter::command(Command::InitDb, name.len());
        writer.write_bytes(name.as_bytes());
        self.send_command(writer.as_bytes())?;

        let result = self.read_simple_ok("set_database");
        self.settle(result)?;
        self.config.database = Some(name.to_string());
        Ok(())
    }

    /// Check the server is alive (COM_PING).
    #[allow(clippy::result_large_err)]
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready("ping")?;
        self.send_command(&[Command::Ping as u8])?;
        let result = self.read_simple_ok("ping");
        self.settle(result)
    }

    /// Read the OK or ERR that answers a command without rows.
    fn read_simple_ok(&mut self, what: &str) -> Result<()> {
        let packet = self.stream()?.read_packet()?;
        let payload = &packet.payload;
        match packet.first_byte() {
            Some(0x00) => {
                let ok = PacketReader::new(payload)
                    .parse_ok_packet()
                    .ok_or_else(|| bad_packet("OK", payload))?;
                let completion = Completion::from(ok);
                self.record_ok(&completion);
                self.complete(completion, RowFormat::Text);
                Ok(())
            }
            Some(0xFF) => {
                let err = PacketReader::new(payload)
                    .parse_err_packet()
                    .ok_or_else(|| bad_packet("ERR", payload))?;
                Err(server_error(err, None))
            }
            _ => Err(unexpected_packet(&format!("OK packet for {what}"), payload)),
        }
    }

    /// Run a text-protocol query (COM_QUERY).
    ///
    /// The SQL is sent as-is.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip_all, fields(len = sql.as_ref().len()))]
    pub fn query(&mut self, sql: impl AsRef<[u8]>) -> Result<QueryResult<'_>> {
        let sql = sql.as_ref();
        self.ensure_ready("query")?;

        let mut writer = PacketWriter::command(Command::Query, sql.len());
        writer.write_bytes(sql);
        self.current_sql = Some(sql.to_vec());
        self.send_command(writer.as_bytes())?;

        self.read_result(RowFormat::Text)
    }

    /// Fetch the next result of a multi-statement query or procedure.
    ///
    /// Returns `None` when no further result is pending.
    #[allow(clippy::result_large_err)]
    pub fn next_result(&mut self) -> Result<Option<QueryResult<'_>>> {
        if !matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::Querying
        ) {
            return Err(invalid_state(
                "next_result",
                self.state.as_str(),
                "not connected",
            ));
        }
        match self.pending {
            Pending::MoreResults(format) => self.read_result(format).map(Some),
            Pending::Rows(_) => Err(invalid_state(
                "next_result",
                self.state.as_str(),
                "the current result set has unread rows",
            )),
            Pending::Nothing => Ok(None),
        }
    }

    /// Read and discard everything still pending: the rows of an open
    /// (or leaked) result set and any further results.
    ///
    /// Returns the first server error met, after the connection is ready
    /// again.
    #[allow(clippy::result_large_err)]
    pub fn drain_results(&mut self) -> Result<()> {
        let mut first_error = None;
        loop {
            match self.pending {
                Pending::Nothing => break,
                Pending::Rows(_) => match self.fetch_row() {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                },
                Pending::MoreResults(format) => match self.read_response(format) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_result(&mut self, format: RowFormat) -> Result<QueryResult<'_>> {
        match self.read_response(format)? {
            Response::Done(completion) => Ok(QueryResult::Done(completion)),
            Response::Rows(open) => Ok(QueryResult::Rows(ResultSet::new(
                self,
                open.columns,
                open.column_info,
            ))),
        }
    }

    fn read_response(&mut self, format: RowFormat) -> Result<Response> {
        let result = self.read_response_inner(format);
        self.settle(result)
    }

    fn read_response_inner(&mut self, format: RowFormat) -> Result<Response> {
        loop {
            let packet = self.stream()?.read_packet()?;
            let payload = &packet.payload;

            match packet.first_byte() {
                Some(0x00) => {
                    let ok = PacketReader::new(payload)
                        .parse_ok_packet()
                        .ok_or_else(|| bad_packet("OK", payload))?;
                    let completion = Completion::from(ok);
                    self.record_ok(&completion);
                    self.complete(completion.clone(), format);
                    return Ok(Response::Done(completion));
                }
                Some(0xFF) => {
                    let err = PacketReader::new(payload)
                        .parse_err_packet()
                        .ok_or_else(|| bad_packet("ERR", payload))?;
                    return Err(server_error(err, self.current_sql.as_deref()));
                }
                Some(0xFB) => {
                    // The client never sends files: an empty packet ends
                    // the transfer and the server answers with OK or ERR.
                    let file = String::from_utf8_lossy(&payload[1..]).into_owned();
                    tracing::warn!(file = %file, "refusing LOCAL INFILE request");
                    self.stream()?.write_packet(&[])?;
                }
                Some(_) => {
                    // Column counts never exceed 16 bits on the wire.
                    let count = PacketReader::new(payload)
                        .read_lenenc_int()
                        .and_then(|n| u16::try_from(n).ok())
                        .ok_or_else(|| bad_packet("column count", payload))?;
                    let columns = self.read_column_definitions(count)?;
                    let open = OpenResult {
                        column_info: column_info(&columns),
                        columns: columns.into(),
                        format,
                    };
                    self.pending = Pending::Rows(open.clone());
                    return Ok(Response::Rows(open));
                }
                None => return Err(unexpected_packet("query response", payload)),
            }
        }
    }

    /// Read `count` column definitions and, without DEPRECATE_EOF, the
    /// EOF packet that follows them.
    fn read_column_definitions(&mut self, count: u16) -> Result<Vec<Column>> {
        let mut columns = Vec::new();
        for _ in 0..count {
            let packet = self.stream()?.read_packet()?;
            columns.push(Column::parse(&packet.payload)?);
        }
        if count > 0 && !self.deprecate_eof() {
            let packet = self.stream()?.read_packet()?;
            if PacketType::classify(&packet.payload, false) != PacketType::Eof {
                return Err(unexpected_packet("EOF after column definitions", &packet.payload));
            }
        }
        Ok(columns)
    }

    /// Read the next row of the open result set.
    ///
    /// `None` once the terminator is read; the connection is then ready
    /// or waiting for the next result.
    pub(crate) fn fetch_row(&mut self) -> Result<Option<Vec<Value>>> {
        let Pending::Rows(open) = &self.pending else {
            return Ok(None);
        };
        let open = open.clone();
        let result = self.fetch_row_inner(&open);
        self.settle(result)
    }

    fn fetch_row_inner(&mut self, open: &OpenResult) -> Result<Option<Vec<Value>>> {
        let deprecate_eof = self.deprecate_eof();
        let packet = self.stream()?.read_packet()?;
        let payload = &packet.payload;

        if packet.first_byte() == Some(0xFF) {
            let err = PacketReader::new(payload)
                .parse_err_packet()
                .ok_or_else(|| bad_packet("ERR", payload))?;
            return Err(server_error(err, self.current_sql.as_deref()));
        }

        if PacketType::classify(payload, deprecate_eof) == PacketType::Eof {
            let mut reader = PacketReader::new(payload);
            let parsed = if deprecate_eof {
                reader.parse_ok_packet().map(Completion::from)
            } else {
                reader.parse_eof_packet().map(|eof| Completion {
                    warnings: eof.warnings,
                    status_flags: eof.status_flags,
                    ..Completion::default()
                })
            };
            let completion = parsed.ok_or_else(|| bad_packet("result terminator", payload))?;
            self.complete(completion, open.format);
            return Ok(None);
        }

        let values = match open.format {
            RowFormat::Text => decode_text_row(payload, &open.columns)?,
            RowFormat::Binary => decode_binary_row(payload, &open.columns)?,
        };
        Ok(Some(values))
    }

    // ==================== Prepared statements ====================

    /// Prepare a statement (COM_STMT_PREPARE).
    #[allow(clippy::result_large_err)]
    pub fn prepare(&mut self, sql: impl AsRef<[u8]>) -> Result<PreparedStatement> {
        let sql = sql.as_ref();
        self.ensure_ready("prepare")?;
        self.current_sql = Some(sql.to_vec());
        self.send_command(&build_stmt_prepare_packet(sql))?;

        let result = self.read_prepare_response(sql);
        let stmt = self.settle(result)?;
        self.current_sql = None;
        self.transition(ConnectionState::Ready);
        Ok(stmt)
    }

    fn read_prepare_response(&mut self, sql: &[u8]) -> Result<PreparedStatement> {
        let packet = self.stream()?.read_packet()?;
        let payload = &packet.payload;
        match packet.first_byte() {
            Some(0x00) => {}
            Some(0xFF) => {
                let err = PacketReader::new(payload)
                    .parse_err_packet()
                    .ok_or_else(|| bad_packet("ERR", payload))?;
                return Err(server_error(err, Some(sql)));
            }
            _ => return Err(unexpected_packet("prepare OK", payload)),
        }

        let ok = parse_stmt_prepare_ok(payload)?;
        let params = self.read_column_definitions(ok.num_params)?;
        let columns = self.read_column_definitions(ok.num_columns)?;
        tracing::debug!(
            statement_id = ok.statement_id,
            params = ok.num_params,
            columns = ok.num_columns,
            "statement prepared"
        );

        Ok(PreparedStatement {
            statement_id: ok.statement_id,
            sql: String::from_utf8_lossy(sql).into_owned(),
            params,
            columns,
            connection_id: self.connection_id().unwrap_or(0),
        })
    }

    fn check_statement(&self, operation: &'static str, stmt: &PreparedStatement) -> Result<()> {
        if Some(stmt.connection_id) != self.connection_id() {
            return Err(invalid_state(
                operation,
                self.state.as_str(),
                format!(
                    "statement {} was prepared on connection {}",
                    stmt.statement_id, stmt.connection_id
                ),
            ));
        }
        Ok(())
    }

    /// Execute a prepared statement (COM_STMT_EXECUTE).
    ///
    /// Rows of the result use the binary protocol.
    #[allow(clippy::result_large_err)]
    pub fn execute(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<QueryResult<'_>> {
        self.ensure_ready("execute")?;
        self.check_statement("execute", stmt)?;
        if params.len() != stmt.param_count() {
            return Err(invalid_state(
                "execute",
                self.state.as_str(),
                format!(
                    "statement expects {} parameters, got {}",
                    stmt.param_count(),
                    params.len()
                ),
            ));
        }

        self.current_sql = Some(stmt.sql.as_bytes().to_vec());
        self.send_command(&build_stmt_execute_packet(stmt.statement_id, params))?;
        self.read_result(RowFormat::Binary)
    }

    /// Release a prepared statement (COM_STMT_CLOSE). The server sends
    /// no reply.
    #[allow(clippy::result_large_err)]
    pub fn close_statement(&mut self, stmt: PreparedStatement) -> Result<()> {
        self.ensure_ready("close_statement")?;
        self.check_statement("close_statement", &stmt)?;
        self.send_command(&build_stmt_close_packet(stmt.statement_id))?;
        self.transition(ConnectionState::Ready);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
