//! Helpers shared by unit tests.

use std::io::{self, Cursor, Read, Write};

use crate::protocol::encode_packet;

/// In-memory duplex stream: reads from a scripted input, records writes.
#[derive(Debug, Default)]
pub struct Duplex {
    pub input: Cursor<Vec<u8>>,
    pub output: Vec<u8>,
}

impl Duplex {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    /// Build the input from `(sequence, payload)` pairs.
    pub fn scripted(packets: &[(u8, &[u8])]) -> Self {
        let mut input = Vec::new();
        for (seq, payload) in packets {
            input.extend(encode_packet(*seq, payload));
        }
        Self::new(input)
    }

    /// Split the recorded output into `(sequence, payload)` frames.
    pub fn written_frames(&self) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut rest = &self.output[..];
        while rest.len() >= 4 {
            let len = usize::from(rest[0]) | usize::from(rest[1]) << 8 | usize::from(rest[2]) << 16;
            let seq = rest[3];
            frames.push((seq, rest[4..4 + len].to_vec()));
            rest = &rest[4 + len..];
        }
        frames
    }
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An OK packet payload with the given status flags.
pub fn ok_payload(affected_rows: u8, last_insert_id: u8, status: u16) -> Vec<u8> {
    let mut p = vec![0x00, affected_rows, last_insert_id];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&[0, 0]);
    p
}

/// An ERR packet payload with SQLSTATE.
pub fn err_payload(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(sqlstate.as_bytes());
    p.extend_from_slice(message.as_bytes());
    p
}
