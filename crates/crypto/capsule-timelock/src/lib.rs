//! # Capsule Timelock
//!
//! Encrypts a payload to a future beacon round. Anyone can seal with the
//! chain's public parameters; nobody can open until the beacon publishes the
//! signature for that round.
//!
//! ```text
//!  seal(payload, reveal_at)
//!      │
//!      ├── chain_info ──► target_round(reveal_at) ──► scheme.encrypt
//!      │
//!      ▼
//!  CTLK | chain hash | round | body
//!      │
//!  open(envelope)
//!      ├── header ──► round
//!      ├── beacon.round_signature(round) ──► NotYetUnlocked until published
//!      └── scheme.decrypt(signature, body)
//! ```
//!
//! The identity-based scheme and the beacon are both injected. Production
//! pairs [`HttpBeacon`] (a drand HTTP relay) with [`DrandScheme`]. [`LocalBeacon`]
//! implements both sides from one secret for development and tests; whoever
//! holds that secret can open any round early.

pub mod beacon;
pub mod chain;
pub mod drand;
pub mod envelope;
pub mod http;
pub mod local;
pub mod scheme;

pub use beacon::{Beacon, RoundSignature};
pub use chain::ChainInfo;
pub use drand::{DrandScheme, QUICKNET_CHAIN_HASH, QUICKNET_SCHEME_ID};
pub use envelope::TimelockCiphertext;
pub use http::{BeaconStats, HttpBeacon};
pub use local::{LocalBeacon, LOCAL_SCHEME_ID};
pub use scheme::TimelockScheme;

use capsule_core::Service;
use chrono::{DateTime, Utc};

/// Result type for time-lock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Time-lock errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("round {round} has not been published yet")]
    NotYetUnlocked { round: u64 },

    #[error("corrupt time-lock ciphertext: {0}")]
    Corrupt(String),

    #[error("ciphertext targets chain {found}, beacon serves {expected}")]
    ForeignChain { expected: String, found: String },

    #[error("beacon scheme {found} does not match {expected}")]
    SchemeMismatch { expected: String, found: String },

    #[error("beacon request failed: {0}")]
    Network(String),

    #[error("beacon request timed out")]
    Timeout,

    #[error("invalid chain info: {0}")]
    InvalidChainInfo(String),

    #[error("time-lock encryption failed: {0}")]
    Encryption(String),
}

impl From<Error> for capsule_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NotYetUnlocked { round } => capsule_core::Error::NotYetUnlocked { round },
            Error::Corrupt(msg) => capsule_core::Error::CorruptCiphertext(msg),
            e @ (Error::ForeignChain { .. } | Error::SchemeMismatch { .. }) => {
                capsule_core::Error::CorruptCiphertext(e.to_string())
            }
            e @ (Error::Network(_) | Error::Timeout | Error::InvalidChainInfo(_)) => {
                capsule_core::Error::network(Service::Beacon, e.to_string())
            }
            Error::Encryption(msg) => capsule_core::Error::Crypto(msg),
        }
    }
}

/// Encrypt `payload` so it opens at the first round emitted at or after
/// `target_time`.
pub fn timelock_seal(
    payload: &[u8],
    target_time: DateTime<Utc>,
    chain: &ChainInfo,
    scheme: &dyn TimelockScheme,
) -> Result<TimelockCiphertext> {
    check_scheme(chain, scheme)?;
    let round = chain.target_round(target_time);
    let body = scheme.encrypt(chain, round, payload)?;
    tracing::debug!(round, bytes = payload.len(), "sealed to beacon round");
    TimelockCiphertext::new(chain.hash().to_vec(), round, body)
}

/// Decrypt a time-lock envelope once its round has been published.
pub async fn timelock_open(
    ciphertext: &[u8],
    beacon: &dyn Beacon,
    scheme: &dyn TimelockScheme,
) -> Result<Vec<u8>> {
    let envelope = TimelockCiphertext::from_bytes(ciphertext)?;
    let chain = beacon.chain_info().await?;
    check_scheme(&chain, scheme)?;
    if envelope.chain_hash() != chain.hash() {
        return Err(Error::ForeignChain {
            expected: chain.hash_hex(),
            found: hex::encode(envelope.chain_hash()),
        });
    }

    let signature = match beacon.round_signature(envelope.round()).await {
        Ok(sig) => sig,
        Err(e @ Error::NotYetUnlocked { .. }) => {
            tracing::debug!(round = envelope.round(), "round not yet published");
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    if signature.round != envelope.round() {
        return Err(Error::Corrupt(format!(
            "beacon returned round {} for {}",
            signature.round,
            envelope.round()
        )));
    }

    scheme
        .decrypt(&chain, &signature, envelope.body())
        .inspect_err(|e| tracing::error!(round = envelope.round(), error = %e, "time-lock decrypt failed"))
}

fn check_scheme(chain: &ChainInfo, scheme: &dyn TimelockScheme) -> Result<()> {
    if chain.scheme_id() != scheme.scheme_id() {
        return Err(Error::SchemeMismatch {
            expected: scheme.scheme_id().to_string(),
            found: chain.scheme_id().to_string(),
        });
    }
    Ok(())
}
