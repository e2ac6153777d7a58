//! A scripted in-process server for exercising the client over real TCP.
//!
//! The server accepts one connection, sends a v10 greeting, accepts any
//! handshake response with OK, then plays a list of exchanges. Every
//! packet the client sends after the handshake is recorded and returned
//! when the server thread is joined.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;

use drizzle_client::protocol::capabilities;
use drizzle_client::protocol::encode_packet;
use drizzle_client::{ClientConfig, ColumnType};

pub const CONNECTION_ID: u32 = 42;
pub const SERVER_VERSION: &str = "7.2.4-drizzle-test";

pub const MORE_RESULTS: u16 = 0x0008;
pub const AUTOCOMMIT: u16 = 0x0002;

/// One step of the server's script.
#[derive(Debug, Clone)]
pub enum Action {
    /// Read one packet from the client and record it
    Recv,
    /// Send a packet, continuing the current sequence
    Send(Vec<u8>),
    /// Send a packet with an explicit sequence number
    SendWithSequence(u8, Vec<u8>),
    /// Stop sending: the client sees end of stream
    Hangup,
}

/// Server capability set.
#[derive(Debug, Clone, Copy)]
pub struct ServerCaps(pub u32);

impl ServerCaps {
    pub fn modern() -> Self {
        ServerCaps(
            capabilities::CLIENT_LONG_PASSWORD
                | capabilities::CLIENT_FOUND_ROWS
                | capabilities::CLIENT_LONG_FLAG
                | capabilities::CLIENT_CONNECT_WITH_DB
                | capabilities::CLIENT_PROTOCOL_41
                | capabilities::CLIENT_TRANSACTIONS
                | capabilities::CLIENT_SECURE_CONNECTION
                | capabilities::CLIENT_MULTI_STATEMENTS
                | capabilities::CLIENT_MULTI_RESULTS
                | capabilities::CLIENT_PS_MULTI_RESULTS
                | capabilities::CLIENT_PLUGIN_AUTH
                | capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
                | capabilities::CLIENT_DEPRECATE_EOF,
        )
    }

    /// A server that still ends column lists and rows with EOF packets.
    pub fn legacy_eof() -> Self {
        ServerCaps(Self::modern().0 & !capabilities::CLIENT_DEPRECATE_EOF)
    }

    pub fn without(self, flag: u32) -> Self {
        ServerCaps(self.0 & !flag)
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<Vec<u8>>>,
}

impl FakeServer {
    pub fn start(caps: ServerCaps, script: Vec<Action>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            serve(stream, caps, &script)
        });
        FakeServer { addr, handle }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new()
            .host(self.addr.ip().to_string())
            .port(self.addr.port())
            .user("tester")
    }

    /// Wait for the client to hang up and return every packet it sent
    /// after the handshake, including the final COM_QUIT if any.
    pub fn finish(self) -> Vec<Vec<u8>> {
        self.handle.join().expect("fake server panicked")
    }
}

fn serve(mut stream: TcpStream, caps: ServerCaps, script: &[Action]) -> Vec<Vec<u8>> {
    stream
        .write_all(&encode_packet(0, &greeting(caps.0)))
        .expect("send greeting");
    let (seq, _response) = read_frame(&mut stream).expect("handshake response");
    stream
        .write_all(&encode_packet(seq.wrapping_add(1), &ok(0, 0, AUTOCOMMIT)))
        .expect("send auth OK");

    let mut received = Vec::new();
    let mut next_seq = 0u8;
    for action in script {
        match action {
            Action::Recv => {
                let (seq, payload) = read_frame(&mut stream).expect("client packet");
                next_seq = seq.wrapping_add(1);
                received.push(payload);
            }
            Action::Send(payload) => {
                stream
                    .write_all(&encode_packet(next_seq, payload))
                    .expect("send packet");
                next_seq = next_seq.wrapping_add(1);
            }
            Action::SendWithSequence(seq, payload) => {
                stream
                    .write_all(&encode_packet(*seq, payload))
                    .expect("send packet");
                next_seq = seq.wrapping_add(1);
            }
            Action::Hangup => {
                stream.shutdown(Shutdown::Write).expect("shutdown write");
            }
        }
    }

    // Whatever follows the script (normally COM_QUIT) until hang-up.
    while let Some((_, payload)) = read_frame(&mut stream) {
        received.push(payload);
    }
    received
}

fn read_frame(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;
    let len = usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    Some((header[3], payload))
}

pub fn greeting(caps: u32) -> Vec<u8> {
    let seed: Vec<u8> = (1u8..=20).collect();
    let mut p = vec![10];
    p.extend_from_slice(SERVER_VERSION.as_bytes());
    p.push(0);
    p.extend_from_slice(&CONNECTION_ID.to_le_bytes());
    p.extend_from_slice(&seed[..8]);
    p.push(0);
    p.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
    p.push(0xFF);
    p.extend_from_slice(&AUTOCOMMIT.to_le_bytes());
    p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    p.push(21);
    p.extend_from_slice(&[0; 10]);
    p.extend_from_slice(&seed[8..]);
    p.push(0);
    p.extend_from_slice(b"mysql_native_password\0");
    p
}

fn lenenc_str(p: &mut Vec<u8>, s: &[u8]) {
    assert!(s.len() < 251);
    p.push(s.len() as u8);
    p.extend_from_slice(s);
}

pub fn ok(affected_rows: u8, last_insert_id: u8, status: u16) -> Vec<u8> {
    let mut p = vec![0x00, affected_rows, last_insert_id];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&[0, 0]);
    p
}

/// The OK-style terminator used with DEPRECATE_EOF.
pub fn ok_terminator(status: u16) -> Vec<u8> {
    let mut p = vec![0xFE, 0, 0];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&[0, 0]);
    p
}

pub fn eof(status: u16) -> Vec<u8> {
    let mut p = vec![0xFE, 0, 0];
    p.extend_from_slice(&status.to_le_bytes());
    p
}

pub fn err(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(sqlstate.as_bytes());
    p.extend_from_slice(message.as_bytes());
    p
}

pub fn column_count(n: u8) -> Vec<u8> {
    vec![n]
}

pub fn column(name: &str, column_type: ColumnType, charset: u16, flags: u16) -> Vec<u8> {
    let mut p = Vec::new();
    lenenc_str(&mut p, b"def");
    lenenc_str(&mut p, b"shop");
    lenenc_str(&mut p, b"items");
    lenenc_str(&mut p, b"items");
    lenenc_str(&mut p, name.as_bytes());
    lenenc_str(&mut p, name.as_bytes());
    p.push(0x0c);
    p.extend_from_slice(&charset.to_le_bytes());
    p.extend_from_slice(&255u32.to_le_bytes());
    p.push(column_type as u8);
    p.extend_from_slice(&flags.to_le_bytes());
    p.push(0);
    p.extend_from_slice(&[0, 0]);
    p
}

pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut p = Vec::new();
    for value in values {
        match value {
            Some(v) => lenenc_str(&mut p, v.as_bytes()),
            None => p.push(0xFB),
        }
    }
    p
}

pub fn prepare_ok(statement_id: u32, columns: u16, params: u16) -> Vec<u8> {
    let mut p = vec![0x00];
    p.extend_from_slice(&statement_id.to_le_bytes());
    p.extend_from_slice(&columns.to_le_bytes());
    p.extend_from_slice(&params.to_le_bytes());
    p.push(0);
    p.extend_from_slice(&[0, 0]);
    p
}

/// The script steps of a one-column, text-protocol result set.
pub fn single_column_result(name: &str, rows: &[&str], status: u16) -> Vec<Action> {
    let mut script = vec![
        Action::Send(column_count(1)),
        Action::Send(column(name, ColumnType::VarString, 33, 0)),
    ];
    for row in rows {
        script.push(Action::Send(text_row(&[Some(row)])));
    }
    script.push(Action::Send(ok_terminator(status)));
    script
}
