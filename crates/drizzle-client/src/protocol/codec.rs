//! Packet framing.
//!
//! `encode_packet` / `decode_packet` convert between logical payloads and
//! wire frames; `PacketStream` wraps a byte stream and tracks the sequence
//! counter of the current exchange.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Read, Write};

use drizzle_core::error::{Error, ProtocolError, ProtocolErrorKind};
use drizzle_core::Result;

use crate::error::{map_io, protocol, truncated};
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// One logical packet: the sequence number of its first frame and the
/// reassembled payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Leading marker byte, if any.
    pub fn first_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Number of frames a payload of `len` bytes occupies.
pub fn frame_count(len: usize) -> usize {
    len / MAX_PACKET_SIZE + 1
}

/// Frame a payload starting at `sequence_id`.
///
/// Payloads of `MAX_PACKET_SIZE` bytes or more are split into full frames
/// followed by a frame with the remainder, which is empty when the payload
/// is an exact multiple of the maximum. Each frame takes the next sequence
/// number.
pub fn encode_packet(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
    let frames = frame_count(payload.len());
    let mut out = Vec::with_capacity(payload.len() + frames * PacketHeader::SIZE);
    let mut seq = sequence_id;
    let mut chunks = payload.chunks(MAX_PACKET_SIZE);
    for _ in 0..frames {
        let chunk = chunks.next().unwrap_or_default();
        let header = PacketHeader {
            payload_length: chunk.len() as u32,
            sequence_id: seq,
        };
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(chunk);
        seq = seq.wrapping_add(1);
    }
    out
}

/// Read one logical packet.
///
/// `sequence` holds the expected sequence number of the next frame and is
/// advanced past every frame consumed. Fails with `Truncated` when the
/// stream ends early (including before the first header byte),
/// `SequenceMismatch` on an out-of-order frame and `PacketTooLarge` when
/// the reassembled payload would exceed `max_packet_size`.
pub fn decode_packet<R: Read>(
    reader: &mut R,
    sequence: &mut u8,
    max_packet_size: usize,
) -> Result<Packet> {
    let first_sequence = *sequence;
    let mut payload = Vec::new();

    loop {
        let mut header_bytes = [0u8; PacketHeader::SIZE];
        read_exact_or_truncated(reader, &mut header_bytes, "packet header")?;
        let header = PacketHeader::from_bytes(&header_bytes);

        if header.sequence_id != *sequence {
            return Err(Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::SequenceMismatch,
                message: format!(
                    "packet sequence mismatch: expected {}, got {}",
                    *sequence, header.sequence_id
                ),
                raw_data: Some(header_bytes.to_vec()),
            }));
        }
        *sequence = sequence.wrapping_add(1);

        let len = header.payload_length as usize;
        if payload.len() + len > max_packet_size {
            return Err(protocol(
                ProtocolErrorKind::PacketTooLarge,
                format!(
                    "packet of at least {} bytes exceeds limit of {} bytes",
                    payload.len() + len,
                    max_packet_size
                ),
            ));
        }

        let start = payload.len();
        payload.resize(start + len, 0);
        read_exact_or_truncated(reader, &mut payload[start..], "packet payload")?;

        if len < MAX_PACKET_SIZE {
            break;
        }
    }

    Ok(Packet {
        sequence_id: first_sequence,
        payload,
    })
}

/// Fill `buf` completely; a short stream is a truncation, not an I/O error.
fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(truncated(format!(
                    "stream ended after {} of {} bytes of {}",
                    filled,
                    buf.len(),
                    what
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(map_io(e, what)),
        }
    }
    Ok(())
}

/// A byte stream speaking framed packets.
#[derive(Debug)]
pub struct PacketStream<S> {
    stream: S,
    sequence_id: u8,
    max_packet_size: usize,
}

impl<S: Read + Write> PacketStream<S> {
    pub fn new(stream: S, max_packet_size: usize) -> Self {
        Self {
            stream,
            sequence_id: 0,
            max_packet_size,
        }
    }

    /// Sequence number expected on the next frame in either direction.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn read_packet(&mut self) -> Result<Packet> {
        let packet = decode_packet(&mut self.stream, &mut self.sequence_id, self.max_packet_size)?;
        tracing::trace!(
            sequence = packet.sequence_id,
            len = packet.payload.len(),
            "read packet"
        );
        Ok(packet)
    }

    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let bytes = encode_packet(self.sequence_id, payload);
        tracing::trace!(sequence = self.sequence_id, len = payload.len(), "write packet");
        self.stream
            .write_all(&bytes)
            .map_err(|e| map_io(e, "write packet"))?;
        self.stream.flush().map_err(|e| map_io(e, "flush"))?;
        self.sequence_id = self.sequence_id.wrapping_add(frame_count(payload.len()) as u8);
        Ok(())
    }

    /// Reset the sequence and send the first packet of a new command.
    pub fn write_command(&mut self, payload: &[u8]) -> Result<()> {
        self.reset_sequence();
        self.write_packet(payload)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Release the stream, returning it with the current sequence number.
    pub fn into_parts(self) -> (S, u8) {
        (self.stream, self.sequence_id)
    }

    /// Rebuild a stream, typically after a transport upgrade.
    pub fn from_parts(stream: S, sequence_id: u8, max_packet_size: usize) -> Self {
        Self {
            stream,
            sequence_id,
            max_packet_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Duplex;
    use std::io::Cursor;

    const LIMIT: usize = 64 * 1024 * 1024;

    #[test]
    fn encode_small_payload() {
        let bytes = encode_packet(3, b"\x03SELECT 1");
        assert_eq!(&bytes[..4], &[9, 0, 0, 3]);
        assert_eq!(&bytes[4..], b"\x03SELECT 1");
    }

    #[test]
    fn encode_empty_payload() {
        assert_eq!(encode_packet(2, &[]), vec![0, 0, 0, 2]);
    }

    #[test]
    fn split_at_exact_max_emits_empty_terminator() {
        let payload = vec![0xAB; MAX_PACKET_SIZE];
        let bytes = encode_packet(0, &payload);
        assert_eq!(bytes.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&bytes[..4], &[0xFF, 0xFF, 0xFF, 0]);
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 1]);

        let mut seq = 0;
        let packet = decode_packet(&mut Cursor::new(bytes), &mut seq, LIMIT).unwrap();
        assert_eq!(packet.payload.len(), MAX_PACKET_SIZE);
        assert_eq!(seq, 2);
    }

    #[test]
    fn split_above_max_reassembles() {
        let mut payload = vec![0x11; MAX_PACKET_SIZE];
        payload.extend_from_slice(b"tail");
        let bytes = encode_packet(254, &payload);
        assert_eq!(&bytes[MAX_PACKET_SIZE + 4..MAX_PACKET_SIZE + 8], &[4, 0, 0, 255]);

        let mut seq = 254;
        let packet = decode_packet(&mut Cursor::new(bytes), &mut seq, LIMIT).unwrap();
        assert_eq!(packet.sequence_id, 254);
        assert_eq!(packet.payload, payload);
        assert_eq!(seq, 0);
    }

    #[test]
    fn decode_empty_stream_is_truncated() {
        let mut seq = 0;
        let err = decode_packet(&mut Cursor::new(Vec::new()), &mut seq, LIMIT).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::Truncated));
    }

    #[test]
    fn decode_short_payload_is_truncated() {
        let mut seq = 0;
        let data = vec![10, 0, 0, 0, b'a', b'b'];
        let err = decode_packet(&mut Cursor::new(data), &mut seq, LIMIT).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::Truncated));
    }

    #[test]
    fn decode_sequence_mismatch() {
        let mut seq = 1;
        let data = encode_packet(3, b"x");
        let err = decode_packet(&mut Cursor::new(data), &mut seq, LIMIT).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::SequenceMismatch));
        assert!(err.message().contains("expected 1, got 3"));
    }

    #[test]
    fn decode_rejects_oversized_packet() {
        let mut seq = 0;
        let data = encode_packet(0, &[0u8; 32]);
        let err = decode_packet(&mut Cursor::new(data), &mut seq, 16).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::PacketTooLarge));
    }

    #[test]
    fn stream_tracks_sequence_across_exchange() {
        let mut inbound = encode_packet(1, b"first");
        inbound.extend(encode_packet(2, b"second"));
        let mut stream = PacketStream::new(Duplex::new(inbound), LIMIT);

        stream.write_command(b"\x0e").unwrap();
        assert_eq!(stream.sequence_id(), 1);
        assert_eq!(stream.get_ref().output, vec![1, 0, 0, 0, 0x0e]);

        assert_eq!(stream.read_packet().unwrap().payload, b"first");
        assert_eq!(stream.read_packet().unwrap().payload, b"second");
        assert_eq!(stream.sequence_id(), 3);

        // The next command starts a fresh exchange.
        stream.write_command(b"\x01").unwrap();
        assert_eq!(&stream.get_ref().output[5..], &[1, 0, 0, 0, 0x01]);
    }
}
