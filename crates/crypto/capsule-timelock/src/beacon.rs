//! Beacon access capability
//!
//! The time-lock never talks to a concrete beacon directly. Callers inject a
//! [`Beacon`] so that tests can script round availability and a beacon
//! migration is a configuration change.

use async_trait::async_trait;

use crate::{ChainInfo, Result};

/// A published round signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSignature {
    pub round: u64,
    pub signature: Vec<u8>,
}

/// Read access to a randomness beacon
#[async_trait]
pub trait Beacon: Send + Sync {
    /// Static chain parameters (public key, genesis, period)
    async fn chain_info(&self) -> Result<ChainInfo>;

    /// Signature for one round.
    ///
    /// Fails with [`crate::Error::NotYetUnlocked`] until the round has been
    /// emitted.
    async fn round_signature(&self, round: u64) -> Result<RoundSignature>;
}
