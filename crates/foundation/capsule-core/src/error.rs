//! Error taxonomy
//!
//! Every crate in the workspace keeps its own error type and converts into
//! [`Error`] at its boundary. The taxonomy answers two questions for any
//! failure: may the caller retry it, and which gate refused the request.

use chrono::{DateTime, Utc};
use std::fmt;

/// The gate that refused a decrypt attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// Human-supplied password layer
    Password,
    /// Access-token ownership check
    Access,
    /// Beacon round not reached, or the time-lock envelope is unreadable
    Timelock,
    /// Random key held out-of-band (anonymous sealing)
    Key,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password => write!(f, "password"),
            Self::Access => write!(f, "access"),
            Self::Timelock => write!(f, "timelock"),
            Self::Key => write!(f, "key"),
        }
    }
}

/// External collaborator reached over the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Beacon,
    Ledger,
    Notary,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beacon => write!(f, "beacon"),
            Self::Ledger => write!(f, "ledger"),
            Self::Notary => write!(f, "notary"),
        }
    }
}

/// Bad input, rejected before any encryption or network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message has {chars} characters, limit is {max}")]
    MessageTooLong { chars: usize, max: usize },

    #[error("reveal time {reveal_at} is not after seal time {sealed_at}")]
    RevealNotAfterSeal {
        sealed_at: DateTime<Utc>,
        reveal_at: DateTime<Utc>,
    },

    #[error("reveal time {reveal_at} is earlier than {earliest}")]
    RevealTooSoon {
        reveal_at: DateTime<Utc>,
        earliest: DateTime<Utc>,
    },

    #[error("private capsules require a password")]
    MissingPassword,

    #[error("keyed capsules require the capsule key")]
    MissingKey,

    #[error("principal is empty")]
    EmptyPrincipal,

    #[error("invalid capsule reference: {0}")]
    InvalidReference(String),
}

/// Unified capsule error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("beacon round {round} has not been published yet")]
    NotYetUnlocked { round: u64 },

    #[error("capsule content has not reached the ledger yet")]
    ContentUnavailable,

    #[error("wrong password")]
    WrongPassword,

    #[error("authentication failed: wrong key or corrupted data")]
    Integrity,

    #[error("access denied for capsule {capsule}: no access token held")]
    AccessDenied { capsule: u64 },

    #[error("connect an identity to check access")]
    IdentityRequired,

    #[error("{service} request failed: {message}")]
    Network { service: Service, message: String },

    #[error("{service} is unavailable")]
    ServiceUnavailable { service: Service },

    #[error("{service} rejected the request: {message}")]
    Rejected { service: Service, message: String },

    #[error("signature rejected: {0}")]
    SignatureRejected(String),

    #[error("corrupt ciphertext: {0}")]
    CorruptCiphertext(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("supply exhausted: {minted} of {max_supply} minted")]
    SupplyExhausted { minted: u64, max_supply: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl Error {
    /// Shorthand for a transport failure against `service`.
    pub fn network(service: Service, message: impl Into<String>) -> Self {
        Self::Network {
            service,
            message: message.into(),
        }
    }

    /// Transient failures the reveal engine retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotYetUnlocked { .. }
                | Self::ContentUnavailable
                | Self::Network { .. }
                | Self::ServiceUnavailable { .. }
        )
    }

    /// Failures the user can recover from by supplying a different secret.
    pub fn is_reenterable(&self) -> bool {
        matches!(self, Self::WrongPassword | Self::Integrity)
    }

    /// Which gate refused the request, when one did.
    pub fn gate(&self) -> Option<Gate> {
        match self {
            Self::WrongPassword => Some(Gate::Password),
            Self::Integrity => Some(Gate::Key),
            Self::AccessDenied { .. } | Self::IdentityRequired => Some(Gate::Access),
            Self::NotYetUnlocked { .. } | Self::CorruptCiphertext(_) => Some(Gate::Timelock),
            _ => None,
        }
    }
}
