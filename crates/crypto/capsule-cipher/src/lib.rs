//! # Capsule Cipher
//!
//! Symmetric layer underneath the time-lock. Two interchangeable schemes:
//!
//! ```text
//!  ANONYMOUS (message in a box)          PASSWORD (private vault)
//!  ─────────────────────────────         ─────────────────────────────
//!  random key ──┐                        password ─► Argon2id ─┐
//!               ▼                                              ▼
//!  XChaCha20-Poly1305(nonce)             ChaCha20-Poly1305(nonce, aad=header)
//!               │                                              │
//!  nonce || box     key (separate)       "cv1$params$salt$nonce$ct"
//! ```
//!
//! The anonymous scheme lets a server hold the ciphertext while the key
//! travels out-of-band. The password scheme embeds its salt and parameters so
//! a human can re-enter the secret from memory.

pub mod anonymous;
pub mod password;

pub use anonymous::{open_anonymous, seal_anonymous, CapsuleKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use password::{open_password, seal_password, seal_password_with, PasswordParams};

/// Result type for cipher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the symmetric layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: wrong key or corrupted data")]
    Integrity,

    #[error("wrong password")]
    WrongPassword,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<Error> for capsule_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Integrity | Error::InvalidKey(_) => capsule_core::Error::Integrity,
            Error::WrongPassword => capsule_core::Error::WrongPassword,
            Error::Encryption(msg) => capsule_core::Error::Crypto(msg),
        }
    }
}
