//! Random-key sealing
//!
//! ## Security
//! - XChaCha20-Poly1305 with a fresh 192-bit random nonce per seal
//! - The key never travels with the ciphertext
//! - Keys are zeroized on drop

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// Key size in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes (192 bits for XChaCha20)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Random key produced by [`seal_anonymous`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CapsuleKey {
    bytes: [u8; KEY_SIZE],
}

impl CapsuleKey {
    /// Fresh key from OS entropy
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Be careful with this - avoid logging or persisting the returned bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// URL-safe text form for sharing out-of-band
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        let decoded = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_bytes(&decoded)
    }
}

impl std::fmt::Debug for CapsuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CapsuleKey([REDACTED])")
    }
}

/// Encrypt under a fresh random key.
///
/// Returns `nonce || ciphertext+tag` and the key as separate artifacts.
pub fn seal_anonymous(plaintext: &[u8]) -> Result<(Vec<u8>, CapsuleKey)> {
    let key = CapsuleKey::generate();
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Encryption("XChaCha20-Poly1305 encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok((out, key))
}

/// Decrypt the output of [`seal_anonymous`].
///
/// Truncated input, a wrong key and tampering all fail with
/// [`Error::Integrity`].
pub fn open_anonymous(ciphertext: &[u8], key: &CapsuleKey) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Integrity);
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Integrity)
}
