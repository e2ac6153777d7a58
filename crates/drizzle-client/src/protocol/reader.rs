//! Packet payload reading.
//!
//! Cursor over a single reassembled payload: fixed-width little-endian
//! integers, length-encoded integers and strings, and the generic
//! OK / ERR / EOF response packets. Every read returns `None` when the
//! payload is too short; callers turn that into a `BadPacket` error.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// Marker byte for SQL NULL in length-encoded positions.
pub const LENENC_NULL: u8 = 0xFB;

/// A cursor over one packet payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos)?;
        self.pos += 1;
        Some(*byte)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.read_array::<2>().map(u16::from_le_bytes)
    }

    /// Read a 3-byte little-endian integer.
    pub fn read_u24_le(&mut self) -> Option<u32> {
        let [a, b, c] = self.read_array::<3>()?;
        Some(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.read_array::<4>().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.read_array::<8>().map(u64::from_le_bytes)
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_array::<1>().map(i8::from_le_bytes)
    }

    pub fn read_i16_le(&mut self) -> Option<i16> {
        self.read_array::<2>().map(i16::from_le_bytes)
    }

    pub fn read_i32_le(&mut self) -> Option<i32> {
        self.read_array::<4>().map(i32::from_le_bytes)
    }

    pub fn read_i64_le(&mut self) -> Option<i64> {
        self.read_array::<8>().map(i64::from_le_bytes)
    }

    pub fn read_f32_le(&mut self) -> Option<f32> {
        self.read_array::<4>().map(f32::from_le_bytes)
    }

    pub fn read_f64_le(&mut self) -> Option<f64> {
        self.read_array::<8>().map(f64::from_le_bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    /// Read a length-encoded integer.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFB: NULL, 0xFF: invalid; both yield `None`
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    /// Read a length-encoded field that may be SQL NULL.
    ///
    /// Returns `Some(None)` for the NULL marker, `Some(Some(bytes))` for a
    /// value and `None` when the payload is malformed.
    pub fn read_lenenc_field(&mut self) -> Option<Option<&'a [u8]>> {
        if self.peek()? == LENENC_NULL {
            self.pos += 1;
            return Some(None);
        }
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len).map(Some)
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_string(len)
    }

    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len)
    }

    /// Read a NUL-terminated string. A missing terminator reads to the end.
    pub fn read_null_string(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end;
        if self.pos < self.data.len() {
            self.pos += 1;
        }
        Some(s)
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Option<String> {
        let bytes = self.read_bytes(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read the remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        rest
    }

    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() >= n {
            self.pos += n;
            true
        } else {
            false
        }
    }

    /// Parse an OK packet.
    ///
    /// Also accepts the 0xFE-led form that terminates a result set when
    /// `CLIENT_DEPRECATE_EOF` is negotiated.
    ///
    /// - marker: 0x00 or 0xFE
    /// - affected_rows: lenenc int
    /// - last_insert_id: lenenc int
    /// - status_flags: 2 bytes
    /// - warnings: 2 bytes
    /// - info: rest of packet (optional)
    pub fn parse_ok_packet(&mut self) -> Option<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.skip(1);
        }

        let affected_rows = self.read_lenenc_int()?;
        let last_insert_id = self.read_lenenc_int()?;
        // Some servers omit the trailing fields on minimal OK packets.
        let status_flags = self.read_u16_le().unwrap_or(0);
        let warnings = self.read_u16_le().unwrap_or(0);
        let info = self.read_rest_string();

        Some(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an ERR packet.
    ///
    /// - 0xFF marker
    /// - error_code: 2 bytes
    /// - optional '#' followed by a 5 byte SQLSTATE
    /// - error_message: rest of packet
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.skip(1);
        }

        let error_code = self.read_u16_le()?;

        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1);
            Some(self.read_string(5)?)
        } else {
            None
        };

        let error_message = self.read_rest_string();

        Some(ErrPacket {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Parse a classic EOF packet (0xFE, warnings, status flags).
    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1);
        }

        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;

        Some(EofPacket {
            warnings,
            status_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let mut reader = PacketReader::new(&[0x42, 0x34, 0x12, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u8(), Some(0x42));
        assert_eq!(reader.read_u16_le(), Some(0x1234));
        assert_eq!(reader.read_u24_le(), Some(0x0012_3456));
        assert_eq!(reader.read_u8(), None);

        let mut reader = PacketReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u32_le(), Some(0x1234_5678));

        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_u64_le(), Some(0x0807_0605_0403_0201));

        let mut reader = PacketReader::new(&[0xFF, 0xFE, 0xFF]);
        assert_eq!(reader.read_i8(), Some(-1));
        assert_eq!(reader.read_i16_le(), Some(-2));
    }

    #[test]
    fn test_short_reads_do_not_advance() {
        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(reader.read_u32_le(), None);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u24_le(), Some(0x0003_0201));
    }

    #[test]
    fn test_read_lenenc_int() {
        let mut reader = PacketReader::new(&[0x42]);
        assert_eq!(reader.read_lenenc_int(), Some(0x42));

        let mut reader = PacketReader::new(&[0xFC, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int(), Some(0x1234));

        let mut reader = PacketReader::new(&[0xFD, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int(), Some(0x0012_3456));

        let mut reader = PacketReader::new(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_lenenc_int(), Some(0x0807_0605_0403_0201));

        let mut reader = PacketReader::new(&[0xFC, 0x34]);
        assert_eq!(reader.read_lenenc_int(), None);
    }

    #[test]
    fn test_read_lenenc_field_null_and_value() {
        let data = [0xFB, 0x02, b'h', b'i', 0x00, 0x05, b'x'];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_lenenc_field(), Some(None));
        assert_eq!(reader.read_lenenc_field(), Some(Some(&b"hi"[..])));
        assert_eq!(reader.read_lenenc_field(), Some(Some(&b""[..])));
        // Declared length 5 but only one byte left.
        assert_eq!(reader.read_lenenc_field(), None);
    }

    #[test]
    fn test_read_null_string() {
        let mut reader = PacketReader::new(b"hello\0world");
        assert_eq!(reader.read_null_string(), Some("hello".to_string()));
        assert_eq!(reader.read_null_string(), Some("world".to_string()));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_parse_ok_packet() {
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);
        assert!(ok.info.is_empty());
    }

    #[test]
    fn test_parse_ok_packet_with_eof_marker() {
        let data = [0xFE, 0x00, 0x00, 0x0A, 0x00, 0x01, 0x00];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.status_flags, 0x000A);
        assert_eq!(ok.warnings, 1);
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state.as_deref(), Some("28000"));
        assert_eq!(err.error_message, "Access denied");
    }

    #[test]
    fn test_parse_err_packet_without_sqlstate() {
        let mut data = vec![0xFF, 0x10, 0x04];
        data.extend_from_slice(b"Too many connections");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1040);
        assert_eq!(err.sql_state, None);
        assert_eq!(err.error_message, "Too many connections");
    }

    #[test]
    fn test_parse_eof_packet() {
        let data = [0xFE, 0x03, 0x00, 0x02, 0x00];
        let eof = PacketReader::new(&data).parse_eof_packet().unwrap();
        assert_eq!(eof.warnings, 3);
        assert_eq!(eof.status_flags, 2);
    }
}
