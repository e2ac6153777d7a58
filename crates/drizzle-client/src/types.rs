//! Column metadata and row decoding.
//!
//! Text rows (COM_QUERY) carry every value as a length-encoded string and
//! are converted according to the declared column type. Binary rows
//! (COM_STMT_EXECUTE) carry a NULL bitmap followed by type-specific
//! encodings.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::sync::Arc;

use drizzle_core::{ColumnInfo, Result, Value};

use crate::error::bad_packet;
use crate::protocol::PacketReader;

/// Charset number the server reports for binary strings.
pub const BINARY_CHARSET: u16 = 63;

/// Declared column type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl ColumnType {
    /// Map a wire type code; unknown codes are treated as strings.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ColumnType::Decimal,
            0x01 => ColumnType::Tiny,
            0x02 => ColumnType::Short,
            0x03 => ColumnType::Long,
            0x04 => ColumnType::Float,
            0x05 => ColumnType::Double,
            0x06 => ColumnType::Null,
            0x07 => ColumnType::Timestamp,
            0x08 => ColumnType::LongLong,
            0x09 => ColumnType::Int24,
            0x0A => ColumnType::Date,
            0x0B => ColumnType::Time,
            0x0C => ColumnType::DateTime,
            0x0D => ColumnType::Year,
            0x0E => ColumnType::NewDate,
            0x0F => ColumnType::VarChar,
            0x10 => ColumnType::Bit,
            0x11 => ColumnType::Timestamp2,
            0x12 => ColumnType::DateTime2,
            0x13 => ColumnType::Time2,
            0xF5 => ColumnType::Json,
            0xF6 => ColumnType::NewDecimal,
            0xF7 => ColumnType::Enum,
            0xF8 => ColumnType::Set,
            0xF9 => ColumnType::TinyBlob,
            0xFA => ColumnType::MediumBlob,
            0xFB => ColumnType::LongBlob,
            0xFC => ColumnType::Blob,
            0xFD => ColumnType::VarString,
            0xFF => ColumnType::Geometry,
            _ => ColumnType::String,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Long
                | ColumnType::LongLong
                | ColumnType::Int24
                | ColumnType::Year
        )
    }

    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob | ColumnType::Blob
        )
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Date
                | ColumnType::Time
                | ColumnType::DateTime
                | ColumnType::Timestamp
                | ColumnType::NewDate
                | ColumnType::Timestamp2
                | ColumnType::DateTime2
                | ColumnType::Time2
        )
    }

    /// SQL name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            ColumnType::Decimal | ColumnType::NewDecimal => "DECIMAL",
            ColumnType::Tiny => "TINYINT",
            ColumnType::Short => "SMALLINT",
            ColumnType::Long => "INT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Null => "NULL",
            ColumnType::Timestamp | ColumnType::Timestamp2 => "TIMESTAMP",
            ColumnType::LongLong => "BIGINT",
            ColumnType::Int24 => "MEDIUMINT",
            ColumnType::Date | ColumnType::NewDate => "DATE",
            ColumnType::Time | ColumnType::Time2 => "TIME",
            ColumnType::DateTime | ColumnType::DateTime2 => "DATETIME",
            ColumnType::Year => "YEAR",
            ColumnType::VarChar | ColumnType::VarString => "VARCHAR",
            ColumnType::Bit => "BIT",
            ColumnType::Json => "JSON",
            ColumnType::Enum => "ENUM",
            ColumnType::Set => "SET",
            ColumnType::TinyBlob => "TINYBLOB",
            ColumnType::MediumBlob => "MEDIUMBLOB",
            ColumnType::LongBlob => "LONGBLOB",
            ColumnType::Blob => "BLOB",
            ColumnType::String => "CHAR",
            ColumnType::Geometry => "GEOMETRY",
        }
    }
}

/// Column definition flags.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// A column definition from a result set or prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Always "def"
    pub catalog: String,
    pub schema: String,
    /// Table name or alias
    pub table: String,
    pub org_table: String,
    /// Column name or alias
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    /// Maximum display length
    pub length: u32,
    pub column_type: ColumnType,
    pub flags: u16,
    pub decimals: u8,
}

impl Column {
    /// Parse a column definition packet (protocol 4.1).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let malformed = || bad_packet("column definition", payload);
        let mut reader = PacketReader::new(payload);

        let catalog = reader.read_lenenc_string().ok_or_else(malformed)?;
        let schema = reader.read_lenenc_string().ok_or_else(malformed)?;
        let table = reader.read_lenenc_string().ok_or_else(malformed)?;
        let org_table = reader.read_lenenc_string().ok_or_else(malformed)?;
        let name = reader.read_lenenc_string().ok_or_else(malformed)?;
        let org_name = reader.read_lenenc_string().ok_or_else(malformed)?;

        // Length of the fixed-size fields, always 0x0c.
        reader.read_lenenc_int().ok_or_else(malformed)?;

        let charset = reader.read_u16_le().ok_or_else(malformed)?;
        let length = reader.read_u32_le().ok_or_else(malformed)?;
        let column_type = ColumnType::from_u8(reader.read_u8().ok_or_else(malformed)?);
        let flags = reader.read_u16_le().ok_or_else(malformed)?;
        let decimals = reader.read_u8().ok_or_else(malformed)?;

        Ok(Column {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            length,
            column_type,
            flags,
            decimals,
        })
    }

    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Binary strings and blobs (charset 63) decode to bytes.
    pub const fn is_binary(&self) -> bool {
        self.charset == BINARY_CHARSET
    }
}

/// Shared name index for rows of a result set.
pub fn column_info(columns: &[Column]) -> Arc<ColumnInfo> {
    Arc::new(ColumnInfo::new(
        columns.iter().map(|c| c.name.clone()).collect(),
    ))
}

/// Decode a text protocol row.
pub fn decode_text_row(payload: &[u8], columns: &[Column]) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());

    for column in columns {
        let field = reader
            .read_lenenc_field()
            .ok_or_else(|| bad_packet("text row", payload))?;
        values.push(match field {
            None => Value::Null,
            Some(data) => decode_text_value(column, data),
        });
    }

    if !reader.is_empty() {
        return Err(bad_packet("text row", payload));
    }
    Ok(values)
}

/// Convert one text-protocol value per the column's declared type.
///
/// Integers widen when UNSIGNED so the full range fits. A value that
/// does not parse as its declared type is kept as text.
pub fn decode_text_value(column: &Column, data: &[u8]) -> Value {
    let text = String::from_utf8_lossy(data);
    let unsigned = column.is_unsigned();
    let fallback = || Value::Text(text.clone().into_owned());

    match column.column_type {
        ColumnType::Tiny if unsigned => text
            .parse::<u8>()
            .map_or_else(|_| fallback(), |v| Value::SmallInt(i16::from(v))),
        ColumnType::Tiny => text.parse::<i8>().map_or_else(|_| fallback(), Value::TinyInt),
        ColumnType::Short | ColumnType::Year if unsigned => text
            .parse::<u16>()
            .map_or_else(|_| fallback(), |v| Value::Int(i32::from(v))),
        ColumnType::Short | ColumnType::Year => {
            text.parse::<i16>().map_or_else(|_| fallback(), Value::SmallInt)
        }
        ColumnType::Long | ColumnType::Int24 if unsigned => text
            .parse::<u32>()
            .map_or_else(|_| fallback(), |v| Value::BigInt(i64::from(v))),
        ColumnType::Long | ColumnType::Int24 => {
            text.parse::<i32>().map_or_else(|_| fallback(), Value::Int)
        }
        ColumnType::LongLong if unsigned => {
            text.parse::<u64>().map_or_else(|_| fallback(), Value::from_u64)
        }
        ColumnType::LongLong => text.parse::<i64>().map_or_else(|_| fallback(), Value::BigInt),

        ColumnType::Float => text.parse::<f32>().map_or_else(|_| fallback(), Value::Float),
        ColumnType::Double => text.parse::<f64>().map_or_else(|_| fallback(), Value::Double),

        // Exact numerics stay textual.
        ColumnType::Decimal | ColumnType::NewDecimal => Value::Decimal(text.into_owned()),

        ColumnType::Bit | ColumnType::Geometry => Value::Bytes(data.to_vec()),

        ColumnType::Json => {
            serde_json::from_slice(data).map_or_else(|_| fallback(), Value::Json)
        }

        ColumnType::Null => Value::Null,

        _ if column.is_binary() && !column.column_type.is_temporal() => {
            Value::Bytes(data.to_vec())
        }

        _ => Value::Text(text.into_owned()),
    }
}

/// Decode a binary protocol row.
///
/// ```text
/// 1        0x00 header
/// n        NULL bitmap, (columns + 7 + 2) / 8 bytes, bit offset 2
/// ...      non-NULL values in column order
/// ```
pub fn decode_binary_row(payload: &[u8], columns: &[Column]) -> Result<Vec<Value>> {
    let malformed = || bad_packet("binary row", payload);
    let mut reader = PacketReader::new(payload);

    if reader.read_u8() != Some(0x00) {
        return Err(malformed());
    }
    let bitmap = reader
        .read_bytes((columns.len() + 7 + 2) / 8)
        .ok_or_else(malformed)?;

    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = decode_binary_value(&mut reader, column).ok_or_else(malformed)?;
        values.push(value);
    }

    if !reader.is_empty() {
        return Err(malformed());
    }
    Ok(values)
}

/// Read one binary-protocol value; `None` when the payload is short.
fn decode_binary_value(reader: &mut PacketReader<'_>, column: &Column) -> Option<Value> {
    let unsigned = column.is_unsigned();

    let value = match column.column_type {
        ColumnType::Tiny if unsigned => Value::SmallInt(i16::from(reader.read_u8()?)),
        ColumnType::Tiny => Value::TinyInt(reader.read_i8()?),
        ColumnType::Short | ColumnType::Year if unsigned => {
            Value::Int(i32::from(reader.read_u16_le()?))
        }
        ColumnType::Short | ColumnType::Year => Value::SmallInt(reader.read_i16_le()?),
        ColumnType::Long | ColumnType::Int24 if unsigned => {
            Value::BigInt(i64::from(reader.read_u32_le()?))
        }
        ColumnType::Long | ColumnType::Int24 => Value::Int(reader.read_i32_le()?),
        ColumnType::LongLong if unsigned => Value::from_u64(reader.read_u64_le()?),
        ColumnType::LongLong => Value::BigInt(reader.read_i64_le()?),
        ColumnType::Float => Value::Float(reader.read_f32_le()?),
        ColumnType::Double => Value::Double(reader.read_f64_le()?),
        ColumnType::Null => Value::Null,

        ColumnType::Date | ColumnType::NewDate => {
            let len = usize::from(reader.read_u8()?);
            Value::Text(format_date(reader.read_bytes(len)?))
        }
        ColumnType::DateTime
        | ColumnType::Timestamp
        | ColumnType::DateTime2
        | ColumnType::Timestamp2 => {
            let len = usize::from(reader.read_u8()?);
            Value::Text(format_datetime(reader.read_bytes(len)?))
        }
        ColumnType::Time | ColumnType::Time2 => {
            let len = usize::from(reader.read_u8()?);
            Value::Text(format_time(reader.read_bytes(len)?))
        }

        ColumnType::Decimal | ColumnType::NewDecimal => {
            Value::Decimal(String::from_utf8_lossy(reader.read_lenenc_bytes()?).into_owned())
        }
        ColumnType::Json => {
            let data = reader.read_lenenc_bytes()?;
            serde_json::from_slice(data).map_or_else(
                |_| Value::Text(String::from_utf8_lossy(data).into_owned()),
                Value::Json,
            )
        }
        ColumnType::Bit | ColumnType::Geometry => Value::Bytes(reader.read_lenenc_bytes()?.to_vec()),
        _ => {
            let data = reader.read_lenenc_bytes()?;
            if column.is_binary() {
                Value::Bytes(data.to_vec())
            } else {
                Value::Text(String::from_utf8_lossy(data).into_owned())
            }
        }
    };
    Some(value)
}

/// `YYYY-MM-DD`; an empty structure is the zero date.
fn format_date(data: &[u8]) -> String {
    if data.len() >= 4 {
        let year = u16::from_le_bytes([data[0], data[1]]);
        format!("{year:04}-{:02}-{:02}", data[2], data[3])
    } else {
        "0000-00-00".to_string()
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`.
fn format_datetime(data: &[u8]) -> String {
    let date = format_date(data);
    if data.len() < 7 {
        return format!("{date} 00:00:00");
    }
    let clock = format!("{:02}:{:02}:{:02}", data[4], data[5], data[6]);
    if data.len() >= 11 {
        let micros = u32::from_le_bytes([data[7], data[8], data[9], data[10]]);
        format!("{date} {clock}.{micros:06}")
    } else {
        format!("{date} {clock}")
    }
}

/// `[-]HH:MM:SS[.ffffff]`, with days folded into the hours.
fn format_time(data: &[u8]) -> String {
    if data.len() < 8 {
        return "00:00:00".to_string();
    }
    let sign = if data[0] != 0 { "-" } else { "" };
    let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    let hours = u64::from(days) * 24 + u64::from(data[5]);
    let clock = format!("{sign}{hours:02}:{:02}:{:02}", data[6], data[7]);
    if data.len() >= 12 {
        let micros = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        format!("{clock}.{micros:06}")
    } else {
        clock
    }
}
