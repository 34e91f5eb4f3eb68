//! Password sealing
//!
//! Output is one self-contained string:
//!
//! ```text
//! cv1$m=19456,t=2,p=1$<salt>$<nonce>$<ciphertext+tag>
//! └┬┘ └──────┬──────┘
//!  │   Argon2id cost            (base64, unpadded)
//!  version
//! ```
//!
//! The `version$params` header is authenticated as associated data, so the
//! cost parameters cannot be swapped without failing the tag check.
//! Malformed strings and wrong passwords both surface as
//! [`Error::WrongPassword`].

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::{Error, Result};

const VERSION: &str = "cv1";
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

/// Upper bound accepted when parsing, so a crafted string cannot demand
/// gigabytes of memory.
const MAX_MEMORY_KIB: u32 = 256 * 1024;
const MAX_ITERATIONS: u32 = 16;
const MAX_LANES: u32 = 8;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u32,
}

impl Default for PasswordParams {
    /// 19 MiB, 2 passes, 1 lane
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            lanes: 1,
        }
    }
}

impl PasswordParams {
    fn header(&self) -> String {
        format!(
            "{}$m={},t={},p={}",
            VERSION, self.memory_kib, self.iterations, self.lanes
        )
    }

    fn parse(field: &str) -> Option<Self> {
        let mut memory_kib = None;
        let mut iterations = None;
        let mut lanes = None;
        for pair in field.split(',') {
            let (name, value) = pair.split_once('=')?;
            let value: u32 = value.parse().ok()?;
            match name {
                "m" => memory_kib = Some(value),
                "t" => iterations = Some(value),
                "p" => lanes = Some(value),
                _ => return None,
            }
        }
        let params = Self {
            memory_kib: memory_kib?,
            iterations: iterations?,
            lanes: lanes?,
        };
        if params.memory_kib > MAX_MEMORY_KIB
            || params.iterations > MAX_ITERATIONS
            || params.lanes > MAX_LANES
        {
            return None;
        }
        Some(params)
    }

    fn derive(&self, password: &str, salt: &[u8]) -> Option<[u8; 32]> {
        let params = Params::new(self.memory_kib, self.iterations, self.lanes, Some(32)).ok()?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .ok()?;
        Some(key)
    }
}

/// Seal with the default Argon2id cost.
pub fn seal_password(plaintext: &[u8], password: &str) -> Result<String> {
    seal_password_with(PasswordParams::default(), plaintext, password)
}

/// Seal with explicit Argon2id cost.
pub fn seal_password_with(
    params: PasswordParams,
    plaintext: &[u8],
    password: &str,
) -> Result<String> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let mut key = params
        .derive(password, &salt)
        .ok_or_else(|| Error::Encryption("invalid Argon2 parameters".into()))?;
    let cipher = ChaCha20Poly1305::new((&key).into());
    key.zeroize();

    let header = params.header();
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| Error::Encryption("ChaCha20-Poly1305 encryption failed".into()))?;

    Ok(format!(
        "{}${}${}${}",
        header,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(nonce),
        STANDARD_NO_PAD.encode(sealed)
    ))
}

/// Open a string produced by [`seal_password`].
pub fn open_password(sealed: &str, password: &str) -> Result<Vec<u8>> {
    let fields: Vec<&str> = sealed.trim().split('$').collect();
    let [version, cost, salt, nonce, body] = fields.as_slice() else {
        return Err(Error::WrongPassword);
    };
    if *version != VERSION {
        return Err(Error::WrongPassword);
    }
    let params = PasswordParams::parse(cost).ok_or(Error::WrongPassword)?;

    let salt = STANDARD_NO_PAD.decode(salt).map_err(|_| Error::WrongPassword)?;
    let nonce = STANDARD_NO_PAD.decode(nonce).map_err(|_| Error::WrongPassword)?;
    let body = STANDARD_NO_PAD.decode(body).map_err(|_| Error::WrongPassword)?;
    if salt.len() != SALT_SIZE || nonce.len() != NONCE_SIZE {
        return Err(Error::WrongPassword);
    }

    let mut key = params.derive(password, &salt).ok_or(Error::WrongPassword)?;
    let cipher = ChaCha20Poly1305::new((&key).into());
    key.zeroize();

    let header = params.header();
    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &body,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| {
            tracing::debug!("password layer rejected ciphertext");
            Error::WrongPassword
        })
}
