//! Connection handshake and authentication.
//!
//! ```text
//! AwaitingGreeting -> NegotiatingCapabilities -> Authenticating -> Authenticated
//!                                                               \-> Failed
//! ```
//!
//! The engine reads the HandshakeV10 greeting, intersects capabilities,
//! optionally upgrades to TLS, sends HandshakeResponse41 and then follows
//! the server through auth switches and caching_sha2 continuations until
//! an OK or ERR packet ends the exchange.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};

use drizzle_core::Result;
use drizzle_core::error::{AuthErrorKind, ProtocolErrorKind};

use crate::auth::{
    AuthPlugin, caching_sha2, cleartext, encrypt_password, normalize_seed, plugins,
};
use crate::config::ClientConfig;
use crate::error::{auth, auth_rejected, bad_packet, protocol, server_error, unexpected_packet};
use crate::protocol::{PacketReader, PacketStream, PacketWriter, capabilities};
use crate::tls::{build_ssl_request, validate_ssl_mode, validate_tls_config};
use crate::transport::Transport;

/// The only greeting version this client speaks.
pub const PROTOCOL_VERSION: u8 = 10;

/// Auth-switch requests accepted before giving up.
const MAX_AUTH_SWITCHES: usize = 4;

/// Progress of one handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingGreeting,
    NegotiatingCapabilities,
    Authenticating,
    Authenticated,
    Failed,
}

impl HandshakeState {
    pub const fn as_str(self) -> &'static str {
        match self {
            HandshakeState::AwaitingGreeting => "awaiting greeting",
            HandshakeState::NegotiatingCapabilities => "negotiating capabilities",
            HandshakeState::Authenticating => "authenticating",
            HandshakeState::Authenticated => "authenticated",
            HandshakeState::Failed => "failed",
        }
    }
}

/// The server's initial HandshakeV10 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Auth plugin data, both parts joined, trailing NUL removed
    pub seed: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    /// Empty when the server does not speak `CLIENT_PLUGIN_AUTH`
    pub auth_plugin: String,
}

/// What the client learned while connecting. Fixed once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub seed: Vec<u8>,
    /// Plugin that completed authentication
    pub auth_plugin: String,
    pub server_capabilities: u32,
    /// Negotiated capabilities in effect for the session
    pub client_capabilities: u32,
    pub charset: u8,
    /// Status flags from the final OK packet
    pub status_flags: u16,
    pub tls: bool,
}

impl HandshakeInfo {
    pub fn has_capability(&self, flag: u32) -> bool {
        self.client_capabilities & flag != 0
    }
}

/// Parse a HandshakeV10 greeting.
///
/// ```text
/// 1        protocol version (10)
/// string   server version, NUL terminated
/// 4        connection id
/// 8        auth plugin data part 1
/// 1        filler
/// 2        capability flags, lower
/// 1        character set
/// 2        status flags
/// 2        capability flags, upper
/// 1        auth plugin data length (0 without CLIENT_PLUGIN_AUTH)
/// 10       reserved
/// n        auth plugin data part 2, max(13, length - 8) bytes
/// string   auth plugin name, NUL terminated
/// ```
pub fn parse_greeting(payload: &[u8]) -> Result<Greeting> {
    let mut reader = PacketReader::new(payload);

    if reader.peek() == Some(0xFF) {
        let err = reader
            .parse_err_packet()
            .ok_or_else(|| bad_packet("greeting error", payload))?;
        return Err(server_error(err, None));
    }

    let protocol_version = reader
        .read_u8()
        .ok_or_else(|| bad_packet("greeting", payload))?;
    if protocol_version != PROTOCOL_VERSION {
        return Err(protocol(
            ProtocolErrorKind::UnsupportedProtocolVersion,
            format!("server speaks protocol version {protocol_version}, expected {PROTOCOL_VERSION}"),
        ));
    }

    let malformed = || bad_packet("greeting", payload);

    let server_version = reader.read_null_string().ok_or_else(malformed)?;
    let connection_id = reader.read_u32_le().ok_or_else(malformed)?;
    let mut seed = reader.read_bytes(8).ok_or_else(malformed)?.to_vec();
    reader.skip(1);

    let caps_lower = reader.read_u16_le().ok_or_else(malformed)?;
    // Pre-4.1 servers may end the greeting here.
    let charset = reader.read_u8().unwrap_or(0);
    let status_flags = reader.read_u16_le().unwrap_or(0);
    let caps_upper = reader.read_u16_le().unwrap_or(0);
    let caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    if caps & capabilities::CLIENT_PROTOCOL_41 == 0 {
        return Err(protocol(
            ProtocolErrorKind::UnsupportedProtocolVersion,
            format!("server {server_version} does not support the 4.1 protocol"),
        ));
    }

    let seed_len = reader.read_u8().unwrap_or(0);
    reader.skip(10);

    if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let part2_len = (usize::from(seed_len).saturating_sub(8)).max(13);
        let part2 = reader
            .read_bytes(part2_len)
            .unwrap_or_else(|| reader.read_rest());
        seed.extend_from_slice(part2);
        if seed.last() == Some(&0) {
            seed.pop();
        }
    }

    let auth_plugin = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        // Some servers omit the terminating NUL.
        reader
            .read_null_string()
            .unwrap_or_else(|| reader.read_rest_string())
    } else {
        String::new()
    };

    Ok(Greeting {
        protocol_version,
        server_version,
        connection_id,
        seed,
        capabilities: caps,
        charset,
        status_flags,
        auth_plugin,
    })
}

/// Capabilities in effect: what the client asks for and the server offers.
pub fn negotiate(config: &ClientConfig, server_caps: u32) -> u32 {
    if config.has_option(crate::config::ConnectionOption::Compress) {
        tracing::warn!("compression requested but not supported; negotiating it off");
    }
    config.capability_flags() & server_caps
}

/// Build the HandshakeResponse41 payload.
pub fn build_handshake_response(
    config: &ClientConfig,
    client_caps: u32,
    auth_plugin: &str,
    auth_response: &[u8],
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(128 + auth_response.len());

    writer.write_u32_le(client_caps);
    writer.write_u32_le(config.max_packet_size);
    writer.write_u8(config.charset);
    writer.write_zeros(23);

    writer.write_null_string(&config.user);

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        writer.write_lenenc_bytes(auth_response);
    } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        writer.write_u8(auth_response.len() as u8);
        writer.write_bytes(auth_response);
    } else {
        writer.write_bytes(auth_response);
        writer.write_u8(0);
    }

    if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        if let Some(db) = &config.database {
            writer.write_null_string(db);
        }
    }

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        writer.write_null_string(auth_plugin);
    }

    if client_caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
        let mut keys: Vec<_> = config.attributes.keys().collect();
        keys.sort();
        let mut attrs = PacketWriter::new();
        for key in keys {
            attrs.write_lenenc_string(key);
            attrs.write_lenenc_string(&config.attributes[key]);
        }
        writer.write_lenenc_bytes(attrs.as_bytes());
    }

    writer.into_bytes()
}

/// Drives one handshake attempt over a fresh transport.
#[derive(Debug)]
pub struct Handshake<'a> {
    config: &'a ClientConfig,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    pub fn new(config: &'a ClientConfig) -> Self {
        Self {
            config,
            state: HandshakeState::AwaitingGreeting,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "handshake");
        self.state = next;
    }

    /// Run the handshake to completion.
    ///
    /// On failure the state is `Failed` and the stream is dropped.
    pub fn run(
        &mut self,
        stream: PacketStream<Transport>,
    ) -> Result<(PacketStream<Transport>, HandshakeInfo)> {
        let result = self.run_inner(stream);
        if result.is_err() {
            self.transition(HandshakeState::Failed);
        }
        result
    }

    fn run_inner(
        &mut self,
        mut stream: PacketStream<Transport>,
    ) -> Result<(PacketStream<Transport>, HandshakeInfo)> {
        let config = self.config;

        let packet = stream.read_packet()?;
        let greeting = parse_greeting(&packet.payload)?;
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            auth_plugin = %greeting.auth_plugin,
            "received greeting"
        );
        self.transition(HandshakeState::NegotiatingCapabilities);

        let mut client_caps = negotiate(config, greeting.capabilities);

        let ssl_mode = config.effective_ssl_mode();
        validate_tls_config(ssl_mode, &config.tls_config)?;
        let use_tls = validate_ssl_mode(ssl_mode, greeting.capabilities)?
            && (!stream.get_ref().is_secure() || ssl_mode.is_required());

        if use_tls {
            client_caps |= capabilities::CLIENT_SSL;
            let request = build_ssl_request(client_caps, config.max_packet_size, config.charset);
            stream.write_packet(&request)?;

            let (transport, sequence_id) = stream.into_parts();
            let transport = transport.upgrade_tls(config)?;
            stream = PacketStream::from_parts(
                transport,
                sequence_id,
                config.max_packet_size as usize,
            );
            tracing::debug!("transport upgraded to TLS");
        } else {
            client_caps &= !capabilities::CLIENT_SSL;
        }

        let plugin_name = if greeting.auth_plugin.is_empty() {
            plugins::MYSQL_NATIVE_PASSWORD
        } else {
            greeting.auth_plugin.as_str()
        };
        let plugin = AuthPlugin::from_name(plugin_name)?;
        let secure = stream.get_ref().is_secure();
        let password = config.password.as_deref().unwrap_or("");

        let response = plugin.initial_response(password, &greeting.seed, secure)?;
        let payload = build_handshake_response(config, client_caps, plugin.name(), &response);
        stream.write_packet(&payload)?;
        self.transition(HandshakeState::Authenticating);

        let outcome = authenticate(
            &mut stream,
            plugin,
            greeting.seed.clone(),
            password,
            secure,
            config.allow_public_key_retrieval,
        )?;
        self.transition(HandshakeState::Authenticated);

        let tls = stream.get_ref().is_tls();
        Ok((
            stream,
            HandshakeInfo {
                protocol_version: greeting.protocol_version,
                server_version: greeting.server_version,
                connection_id: greeting.connection_id,
                seed: outcome.seed,
                auth_plugin: outcome.plugin.name().to_string(),
                server_capabilities: greeting.capabilities,
                client_capabilities: client_caps,
                charset: greeting.charset,
                status_flags: outcome.status_flags,
                tls,
            },
        ))
    }
}

/// Result of a successful authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub plugin: AuthPlugin,
    pub seed: Vec<u8>,
    pub status_flags: u16,
}

/// Follow the server's replies after the handshake response until OK.
///
/// Handles auth switch requests (0xFE) and auth-more-data (0x01) for
/// caching_sha2_password and sha256_password.
pub fn authenticate<S: Read + Write>(
    stream: &mut PacketStream<S>,
    mut plugin: AuthPlugin,
    mut seed: Vec<u8>,
    password: &str,
    secure: bool,
    allow_public_key_retrieval: bool,
) -> Result<AuthOutcome> {
    let mut switches = 0;
    let mut awaiting_public_key = false;

    loop {
        let packet = stream.read_packet()?;
        let payload = &packet.payload;

        match packet.first_byte() {
            Some(0x00) => {
                let ok = PacketReader::new(payload)
                    .parse_ok_packet()
                    .ok_or_else(|| bad_packet("OK", payload))?;
                return Ok(AuthOutcome {
                    plugin,
                    seed,
                    status_flags: ok.status_flags,
                });
            }
            Some(0xFF) => {
                let err = PacketReader::new(payload)
                    .parse_err_packet()
                    .ok_or_else(|| bad_packet("ERR", payload))?;
                return Err(auth_rejected(err));
            }
            Some(0xFE) => {
                switches += 1;
                if switches > MAX_AUTH_SWITCHES {
                    return Err(protocol(
                        ProtocolErrorKind::UnexpectedPacket,
                        format!("server requested more than {MAX_AUTH_SWITCHES} auth switches"),
                    ));
                }
                if payload.len() == 1 {
                    return Err(auth(
                        AuthErrorKind::UnsupportedPlugin,
                        "server requested the pre-4.1 password scheme",
                    ));
                }

                let mut reader = PacketReader::new(&payload[1..]);
                let name = reader
                    .read_null_string()
                    .ok_or_else(|| bad_packet("auth switch", payload))?;
                plugin = AuthPlugin::from_name(&name)?;
                seed = normalize_seed(reader.read_rest()).to_vec();
                awaiting_public_key = false;
                tracing::debug!(plugin = plugin.name(), "auth switch");

                let response = plugin.initial_response(password, &seed, secure)?;
                stream.write_packet(&response)?;
            }
            Some(0x01) => {
                let data = &payload[1..];
                match plugin {
                    AuthPlugin::CachingSha2Password if !awaiting_public_key => {
                        match data.first() {
                            Some(&caching_sha2::FAST_AUTH_SUCCESS) => {
                                tracing::trace!("caching_sha2 fast auth succeeded");
                            }
                            Some(&caching_sha2::PERFORM_FULL_AUTH) => {
                                tracing::debug!("caching_sha2 full authentication");
                                if secure {
                                    stream.write_packet(&cleartext(password))?;
                                } else if allow_public_key_retrieval {
                                    stream.write_packet(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
                                    awaiting_public_key = true;
                                } else {
                                    return Err(auth(
                                        AuthErrorKind::InsecureTransport,
                                        "caching_sha2_password full authentication needs TLS \
                                         or allow_public_key_retrieval",
                                    ));
                                }
                            }
                            _ => return Err(unexpected_packet("caching_sha2 status", payload)),
                        }
                    }
                    AuthPlugin::CachingSha2Password | AuthPlugin::Sha256Password => {
                        let encrypted = encrypt_password(password, &seed, data)?;
                        stream.write_packet(&encrypted)?;
                        awaiting_public_key = false;
                    }
                    _ => return Err(unexpected_packet("authentication result", payload)),
                }
            }
            _ => return Err(unexpected_packet("authentication result", payload)),
        }
    }
}
