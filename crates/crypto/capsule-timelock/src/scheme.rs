//! Identity-based encryption keyed by beacon rounds

use crate::{ChainInfo, Result, RoundSignature};

/// Encrypts to a future round using only static chain parameters, and
/// decrypts once that round's signature is public.
///
/// Implementations are the trust anchor of the whole system: `encrypt` must
/// not require the round signature, and `decrypt` must be impossible
/// without it.
pub trait TimelockScheme: Send + Sync {
    /// Identifier matched against [`ChainInfo::scheme_id`]
    fn scheme_id(&self) -> &str;

    /// Encrypt `payload` for the identity of `round`.
    fn encrypt(&self, chain: &ChainInfo, round: u64, payload: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `body` with the published signature for its round.
    fn decrypt(&self, chain: &ChainInfo, signature: &RoundSignature, body: &[u8]) -> Result<Vec<u8>>;
}
