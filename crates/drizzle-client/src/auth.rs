//! Authentication plugins.
//!
//! - `mysql_native_password`: SHA1 double-hash challenge
//! - `caching_sha2_password`: SHA256 scramble, with a full-auth fallback
//! - `sha256_password`: password sent over TLS or RSA encrypted
//! - `mysql_clear_password`: cleartext, only over TLS
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```

use drizzle_core::Result;
use drizzle_core::error::AuthErrorKind;
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::auth;

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Auth-more-data codes used by caching_sha2_password.
pub mod caching_sha2 {
    /// Client asks the server for its RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// The cached scramble matched; an OK packet follows
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// The server needs the password itself
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Scramble length expected from the server.
pub const SCRAMBLE_LEN: usize = 20;

/// Byte sent by sha256_password to ask for the server public key.
const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// A supported authentication plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    Sha256Password,
    ClearPassword,
}

impl AuthPlugin {
    /// Look up a plugin by its wire name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Ok(AuthPlugin::NativePassword),
            plugins::CACHING_SHA2_PASSWORD => Ok(AuthPlugin::CachingSha2Password),
            plugins::SHA256_PASSWORD => Ok(AuthPlugin::Sha256Password),
            plugins::MYSQL_CLEAR_PASSWORD => Ok(AuthPlugin::ClearPassword),
            other => Err(auth(
                AuthErrorKind::UnsupportedPlugin,
                format!("authentication plugin '{other}' is not supported"),
            )),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
            AuthPlugin::Sha256Password => plugins::SHA256_PASSWORD,
            AuthPlugin::ClearPassword => plugins::MYSQL_CLEAR_PASSWORD,
        }
    }

    /// Compute the initial auth response for this plugin.
    ///
    /// `secure` is true when the channel is TLS or a Unix socket, which
    /// allows the password to travel in the clear.
    pub fn initial_response(self, password: &str, seed: &[u8], secure: bool) -> Result<Vec<u8>> {
        match self {
            AuthPlugin::NativePassword => {
                require_scramble(self, password, seed)?;
                Ok(mysql_native_password(password, seed))
            }
            AuthPlugin::CachingSha2Password => {
                require_scramble(self, password, seed)?;
                Ok(caching_sha2_password(password, seed))
            }
            AuthPlugin::Sha256Password => {
                if password.is_empty() {
                    Ok(vec![0])
                } else if secure {
                    Ok(cleartext(password))
                } else {
                    Ok(vec![SHA256_REQUEST_PUBLIC_KEY])
                }
            }
            AuthPlugin::ClearPassword => {
                if !secure {
                    return Err(auth(
                        AuthErrorKind::InsecureTransport,
                        "mysql_clear_password requires a TLS or local socket connection",
                    ));
                }
                Ok(cleartext(password))
            }
        }
    }
}

fn require_scramble(plugin: AuthPlugin, password: &str, seed: &[u8]) -> Result<()> {
    if !password.is_empty() && seed.len() < SCRAMBLE_LEN {
        return Err(auth(
            AuthErrorKind::NoScramble,
            format!(
                "{} needs a {}-byte scramble, server sent {} bytes",
                plugin.name(),
                SCRAMBLE_LEN,
                seed.len()
            ),
        ));
    }
    Ok(())
}

/// Strip the trailing NUL servers append to the scramble.
pub fn normalize_seed(seed: &[u8]) -> &[u8] {
    match seed.split_last() {
        Some((&0, rest)) if rest.len() == SCRAMBLE_LEN => rest,
        _ => seed,
    }
}

/// Compute the mysql_native_password response.
///
/// Returns an empty response for an empty password.
pub fn mysql_native_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }
    let seed = &seed[..seed.len().min(SCRAMBLE_LEN)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    xor(&stage1, &stage3)
}

/// Compute the caching_sha2_password fast-auth response.
///
/// Returns an empty response for an empty password.
pub fn caching_sha2_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }
    let seed = normalize_seed(seed);

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    xor(&password_hash, &scramble)
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// The password followed by a NUL, as sent over a secure channel.
pub fn cleartext(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// Encrypt the password with the server's RSA public key.
///
/// The NUL-terminated password is XORed with the repeating seed and
/// encrypted with RSA-OAEP (SHA1). Used for full authentication by
/// caching_sha2_password and sha256_password without TLS.
pub fn encrypt_password(password: &str, seed: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    let seed = normalize_seed(seed);
    if seed.is_empty() {
        return Err(auth(
            AuthErrorKind::NoScramble,
            "cannot encrypt password without a scramble",
        ));
    }

    let mut pw = cleartext(password);
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem).map_err(|e| {
        auth(
            AuthErrorKind::Encryption,
            format!("server public key is not valid UTF-8 PEM: {e}"),
        )
    })?;

    let pub_key = RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| {
            auth(
                AuthErrorKind::Encryption,
                format!("failed to parse server public key: {e}"),
            )
        })?;

    pub_key
        .encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
        .map_err(|e| auth(AuthErrorKind::Encryption, format!("RSA encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 20] = [
        0x3d, 0x4c, 0x5e, 0x2f, 0x1a, 0x0b, 0x7c, 0x8d, 0x9e, 0xaf, 0x10, 0x21, 0x32, 0x43, 0x54,
        0x65, 0x76, 0x87, 0x98, 0xa9,
    ];

    /// Server-side check for mysql_native_password: the server stores
    /// SHA1(SHA1(password)) and recovers SHA1(password) from the response.
    fn native_server_accepts(password: &str, seed: &[u8], response: &[u8]) -> bool {
        let stored: [u8; 20] = Sha1::digest(Sha1::digest(password.as_bytes())).into();
        let mut hasher = Sha1::new();
        hasher.update(seed);
        hasher.update(stored);
        let mask: [u8; 20] = hasher.finalize().into();
        let candidate = xor(response, &mask);
        let check: [u8; 20] = Sha1::digest(&candidate).into();
        check == stored
    }

    /// Server-side fast-auth check for caching_sha2_password.
    fn sha2_server_accepts(password: &str, seed: &[u8], response: &[u8]) -> bool {
        let stored: [u8; 32] = Sha256::digest(Sha256::digest(password.as_bytes())).into();
        let mut hasher = Sha256::new();
        hasher.update(stored);
        hasher.update(seed);
        let mask: [u8; 32] = hasher.finalize().into();
        let candidate = xor(response, &mask);
        let check: [u8; 32] = Sha256::digest(&candidate).into();
        check == stored
    }

    #[test]
    fn native_password_verifies_like_the_server() {
        let response = mysql_native_password("secret", &SEED);
        assert_eq!(response.len(), 20);
        assert!(native_server_accepts("secret", &SEED, &response));
        assert!(!native_server_accepts("other", &SEED, &response));
    }

    #[test]
    fn native_password_empty() {
        assert!(mysql_native_password("", &SEED).is_empty());
    }

    #[test]
    fn caching_sha2_verifies_like_the_server() {
        let response = caching_sha2_password("secret", &SEED);
        assert_eq!(response.len(), 32);
        assert!(sha2_server_accepts("secret", &SEED, &response));
        assert!(!sha2_server_accepts("secret", &[0u8; 20], &response));
    }

    #[test]
    fn caching_sha2_ignores_trailing_nul() {
        let mut seed = SEED.to_vec();
        seed.push(0);
        assert_eq!(
            caching_sha2_password("secret", &seed),
            caching_sha2_password("secret", &SEED)
        );
    }

    #[test]
    fn plugin_lookup() {
        assert_eq!(
            AuthPlugin::from_name("caching_sha2_password").unwrap(),
            AuthPlugin::CachingSha2Password
        );
        let err = AuthPlugin::from_name("auth_gssapi_client").unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::UnsupportedPlugin));
        assert!(err.is_fatal());
    }

    #[test]
    fn short_scramble_is_rejected() {
        let err = AuthPlugin::NativePassword
            .initial_response("secret", &SEED[..8], false)
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::NoScramble));
        // An empty password needs no scramble.
        assert!(
            AuthPlugin::NativePassword
                .initial_response("", &[], false)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn clear_password_requires_secure_channel() {
        let err = AuthPlugin::ClearPassword
            .initial_response("pw", &SEED, false)
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::InsecureTransport));
        assert_eq!(
            AuthPlugin::ClearPassword
                .initial_response("pw", &SEED, true)
                .unwrap(),
            b"pw\0"
        );
    }

    #[test]
    fn sha256_requests_key_without_tls() {
        assert_eq!(
            AuthPlugin::Sha256Password
                .initial_response("pw", &SEED, false)
                .unwrap(),
            vec![SHA256_REQUEST_PUBLIC_KEY]
        );
    }

    #[test]
    fn encrypt_rejects_garbage_key() {
        let err = encrypt_password("pw", &SEED, b"not a key").unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::Encryption));
    }
}
