//! Prepared statements (binary protocol).
//!
//! 1. COM_STMT_PREPARE with the SQL text. The server answers with a
//!    prepare-OK carrying the statement id and the parameter and column
//!    counts, followed by that many parameter and column definitions.
//! 2. COM_STMT_EXECUTE with the statement id and binary-encoded
//!    parameters. The answer is an OK, an ERR or a result set whose rows
//!    use the binary row format.
//! 3. COM_STMT_CLOSE with the statement id. The server sends nothing back.

#![allow(clippy::cast_possible_truncation)]

use drizzle_core::{Result, Value};

use super::{Command, PacketReader, PacketWriter};
use crate::error::bad_packet;
use crate::types::{Column, ColumnType};

/// Flag byte marking an unsigned parameter type.
const UNSIGNED_PARAM: u8 = 0x80;

/// Header of a COM_STMT_PREPARE response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

/// A statement prepared on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub statement_id: u32,
    pub sql: String,
    pub params: Vec<Column>,
    pub columns: Vec<Column>,
    /// Connection the statement belongs to
    pub connection_id: u32,
}

impl PreparedStatement {
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

pub fn build_stmt_prepare_packet(sql: &[u8]) -> Vec<u8> {
    let mut writer = PacketWriter::command(Command::StmtPrepare, sql.len());
    writer.write_bytes(sql);
    writer.into_bytes()
}

/// Build a COM_STMT_EXECUTE payload.
///
/// ```text
/// 1        0x17
/// 4        statement id
/// 1        flags (0: no cursor)
/// 4        iteration count (1)
/// n        NULL bitmap, (params + 7) / 8 bytes      } only with
/// 1        new-params-bound flag (1)                 } parameters
/// 2*params type and unsigned flag per parameter      }
/// ...      non-NULL values                           }
/// ```
pub fn build_stmt_execute_packet(statement_id: u32, params: &[Value]) -> Vec<u8> {
    let mut writer = PacketWriter::command(Command::StmtExecute, 16 + params.len() * 16);
    writer.write_u32_le(statement_id);
    writer.write_u8(0x00);
    writer.write_u32_le(1);

    if params.is_empty() {
        return writer.into_bytes();
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    writer.write_bytes(&null_bitmap);
    writer.write_u8(1);

    for param in params {
        let (column_type, unsigned) = param_type(param);
        writer.write_u8(column_type as u8);
        writer.write_u8(if unsigned { UNSIGNED_PARAM } else { 0 });
    }

    for param in params {
        encode_param(&mut writer, param);
    }

    writer.into_bytes()
}

pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::command(Command::StmtClose, 4);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Parse the first packet of a COM_STMT_PREPARE response.
///
/// ```text
/// 1        0x00
/// 4        statement id
/// 2        number of columns
/// 2        number of parameters
/// 1        reserved
/// 2        warning count
/// ```
pub fn parse_stmt_prepare_ok(payload: &[u8]) -> Result<StmtPrepareOk> {
    let malformed = || bad_packet("prepare OK", payload);
    let mut reader = PacketReader::new(payload);

    if reader.read_u8() != Some(0x00) {
        return Err(malformed());
    }
    let statement_id = reader.read_u32_le().ok_or_else(malformed)?;
    let num_columns = reader.read_u16_le().ok_or_else(malformed)?;
    let num_params = reader.read_u16_le().ok_or_else(malformed)?;
    reader.skip(1);
    let warnings = reader.read_u16_le().unwrap_or(0);

    Ok(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

/// Wire type and signedness used to send a value.
fn param_type(value: &Value) -> (ColumnType, bool) {
    match value {
        Value::Null => (ColumnType::Null, false),
        Value::Bool(_) | Value::TinyInt(_) => (ColumnType::Tiny, false),
        Value::SmallInt(_) => (ColumnType::Short, false),
        Value::Int(_) => (ColumnType::Long, false),
        Value::BigInt(_) => (ColumnType::LongLong, false),
        Value::UnsignedBigInt(_) => (ColumnType::LongLong, true),
        Value::Float(_) => (ColumnType::Float, false),
        Value::Double(_) => (ColumnType::Double, false),
        Value::Decimal(_) => (ColumnType::NewDecimal, false),
        Value::Text(_) => (ColumnType::VarString, false),
        Value::Bytes(_) => (ColumnType::Blob, false),
        Value::Json(_) => (ColumnType::Json, false),
    }
}

/// Append a value's binary encoding. NULLs live in the bitmap only.
fn encode_param(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => writer.write_u8(u8::from(*b)),
        Value::TinyInt(v) => writer.write_u8(*v as u8),
        Value::SmallInt(v) => writer.write_u16_le(*v as u16),
        Value::Int(v) => writer.write_u32_le(*v as u32),
        Value::BigInt(v) => writer.write_u64_le(*v as u64),
        Value::UnsignedBigInt(v) => writer.write_u64_le(*v),
        Value::Float(v) => writer.write_bytes(&v.to_le_bytes()),
        Value::Double(v) => writer.write_bytes(&v.to_le_bytes()),
        Value::Decimal(s) | Value::Text(s) => writer.write_lenenc_string(s),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Json(j) => writer.write_lenenc_string(&j.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drizzle_core::error::ProtocolErrorKind;

    #[test]
    fn prepare_packet_carries_raw_sql() {
        let payload = build_stmt_prepare_packet(b"SELECT ? + 1");
        assert_eq!(payload[0], Command::StmtPrepare as u8);
        assert_eq!(&payload[1..], b"SELECT ? + 1");
    }

    #[test]
    fn execute_without_params() {
        let payload = build_stmt_execute_packet(7, &[]);
        assert_eq!(payload, vec![0x17, 7, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn execute_with_params_and_null() {
        let params = [
            Value::Int(5),
            Value::Null,
            Value::Text("hi".to_string()),
            Value::UnsignedBigInt(u64::MAX),
        ];
        let payload = build_stmt_execute_packet(1, &params);

        let mut r = PacketReader::new(&payload);
        assert_eq!(r.read_u8(), Some(0x17));
        assert_eq!(r.read_u32_le(), Some(1));
        assert_eq!(r.read_u8(), Some(0));
        assert_eq!(r.read_u32_le(), Some(1));
        assert_eq!(r.read_u8(), Some(0b0000_0010));
        assert_eq!(r.read_u8(), Some(1));
        assert_eq!(
            r.read_bytes(8),
            Some(&[0x03, 0, 0x06, 0, 0xFD, 0, 0x08, 0x80][..])
        );
        assert_eq!(r.read_i32_le(), Some(5));
        assert_eq!(r.read_lenenc_string().as_deref(), Some("hi"));
        assert_eq!(r.read_u64_le(), Some(u64::MAX));
        assert!(r.is_empty());
    }

    #[test]
    fn close_packet() {
        assert_eq!(build_stmt_close_packet(0x0102_0304), vec![0x19, 4, 3, 2, 1]);
    }

    #[test]
    fn parse_prepare_ok() {
        let payload = [0x00, 9, 0, 0, 0, 2, 0, 1, 0, 0, 3, 0];
        let ok = parse_stmt_prepare_ok(&payload).unwrap();
        assert_eq!(
            ok,
            StmtPrepareOk {
                statement_id: 9,
                num_columns: 2,
                num_params: 1,
                warnings: 3,
            }
        );
    }

    #[test]
    fn parse_prepare_ok_rejects_short_payload() {
        let err = parse_stmt_prepare_ok(&[0x00, 1, 0]).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::BadPacket));
    }
}
