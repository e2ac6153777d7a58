//! Query results.
//!
//! A command either completes without rows (`QueryResult::Done`) or opens
//! a result set (`QueryResult::Rows`). A `ResultSet` borrows the
//! connection mutably, so no other command can be issued while rows are
//! still on the wire; rows are read lazily, one packet at a time.

use std::sync::Arc;

use drizzle_core::{ColumnInfo, Result, Row};

use crate::connection::Connection;
use crate::protocol::{OkPacket, server_status};
use crate::types::Column;

/// Row encoding of an open result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowFormat {
    /// Text protocol rows (COM_QUERY)
    Text,
    /// Binary protocol rows (COM_STMT_EXECUTE)
    Binary,
}

/// Outcome of a command that produced no rows, or the terminator of a
/// result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
    pub status_flags: u16,
    pub info: String,
}

impl Completion {
    /// Whether another result follows this one.
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }
}

impl From<OkPacket> for Completion {
    fn from(ok: OkPacket) -> Self {
        Completion {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
            status_flags: ok.status_flags,
            info: ok.info,
        }
    }
}

/// Response to a query or statement execution.
#[derive(Debug)]
pub enum QueryResult<'c> {
    Done(Completion),
    Rows(ResultSet<'c>),
}

impl<'c> QueryResult<'c> {
    pub fn is_rows(&self) -> bool {
        matches!(self, QueryResult::Rows(_))
    }

    /// The completion, when the command produced no rows.
    pub fn completion(&self) -> Option<&Completion> {
        match self {
            QueryResult::Done(c) => Some(c),
            QueryResult::Rows(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<ResultSet<'c>> {
        match self {
            QueryResult::Rows(rs) => Some(rs),
            QueryResult::Done(_) => None,
        }
    }

    /// Read every row; a command without rows yields none.
    pub fn collect_rows(self) -> Result<Vec<Row>> {
        match self {
            QueryResult::Rows(rs) => rs.collect_rows(),
            QueryResult::Done(_) => Ok(Vec::new()),
        }
    }

    /// Affected rows, when the command produced no rows.
    pub fn affected_rows(&self) -> u64 {
        self.completion().map_or(0, |c| c.affected_rows)
    }
}

/// A forward-only stream of rows.
///
/// Dropping an unfinished result set reads and discards the remaining
/// rows so the connection can be reused.
pub struct ResultSet<'c> {
    conn: &'c mut Connection,
    columns: Arc<[Column]>,
    column_info: Arc<ColumnInfo>,
    end: Option<Completion>,
    finished: bool,
}

impl std::fmt::Debug for ResultSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.column_info.names())
            .field("end", &self.end)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<'c> ResultSet<'c> {
    pub(crate) fn new(
        conn: &'c mut Connection,
        columns: Arc<[Column]>,
        column_info: Arc<ColumnInfo>,
    ) -> Self {
        Self {
            conn,
            columns,
            column_info,
            end: None,
            finished: false,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.column_info
    }

    /// Read the next row, or `None` once the terminator has been read.
    ///
    /// A server error inside the row stream ends the result and is
    /// returned; the connection is ready again afterwards.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        match self.conn.fetch_row() {
            Ok(Some(values)) => Ok(Some(Row::with_columns(
                Arc::clone(&self.column_info),
                values,
            ))),
            Ok(None) => {
                self.finished = true;
                self.end = self.conn.last_completion().cloned();
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Terminator status, once all rows have been read.
    pub fn end_status(&self) -> Option<&Completion> {
        self.end.as_ref()
    }

    /// Whether another result follows; only known once rows are drained.
    pub fn more_results(&self) -> bool {
        self.end.as_ref().is_some_and(Completion::more_results)
    }

    /// Read and drop the remaining rows.
    pub fn discard(mut self) -> Result<Option<Completion>> {
        while self.next_row()?.is_some() {}
        Ok(self.end.take())
    }

    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Iterator for ResultSet<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for ResultSet<'_> {
    fn drop(&mut self) {
        while !self.finished {
            if let Err(e) = self.next_row() {
                tracing::debug!(error = %e, "error while draining dropped result set");
            }
        }
    }
}
