//! Single-operator beacon for development and tests
//!
//! Holds one secret and derives every round signature from it. It publishes
//! round `r` only once its clock reaches `round_time(r)`, but the secret
//! holder can compute any future signature, so nothing here stops the
//! operator from opening early. Use [`crate::DrandScheme`] against a public
//! network for that guarantee.
//!
//! ```text
//!  secret ──HMAC("capsule-round:" || r)──► signature(r)
//!                                              │
//!                                 HKDF-SHA256 ─┴─► key(r)
//!                                                   │
//!                   ChaCha20-Poly1305(nonce, aad = r)
//! ```
//!
//! Sealing derives `key(r)` directly, which is why only the operator can
//! seal against a local beacon.

use async_trait::async_trait;
use capsule_core::Clock;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::{Beacon, ChainInfo, Error, Result, RoundSignature, TimelockScheme};

/// Scheme identifier advertised in [`ChainInfo`]
pub const LOCAL_SCHEME_ID: &str = "capsule-hmac-chacha20poly1305";

const NONCE_SIZE: usize = 12;
const KEY_INFO: &[u8] = b"capsule-timelock-v1";

type HmacSha256 = Hmac<Sha256>;

/// Trusted local beacon; also the matching [`TimelockScheme`]
pub struct LocalBeacon {
    secret: Zeroizing<[u8; 32]>,
    chain: ChainInfo,
    clock: Arc<dyn Clock>,
}

impl LocalBeacon {
    /// Fresh random secret.
    pub fn generate(genesis_time: i64, period: u64, clock: Arc<dyn Clock>) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(secret, genesis_time, period, clock)
    }

    pub fn from_secret(secret: [u8; 32], genesis_time: i64, period: u64, clock: Arc<dyn Clock>) -> Self {
        let public_key = Sha256::new()
            .chain_update(b"capsule-local-beacon-pk:")
            .chain_update(secret)
            .finalize()
            .to_vec();
        let hash = Sha256::new()
            .chain_update(&public_key)
            .chain_update(genesis_time.to_be_bytes())
            .chain_update(period.max(1).to_be_bytes())
            .finalize()
            .to_vec();

        let chain = ChainInfo::trusted(hash, public_key, genesis_time, period.max(1), LOCAL_SCHEME_ID)
            .with_beacon_id("local");

        Self {
            secret: Zeroizing::new(secret),
            chain,
            clock,
        }
    }

    /// Restore from [`LocalBeacon::secret_hex`].
    pub fn from_hex(secret_hex: &str, genesis_time: i64, period: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim())
                .map_err(|e| Error::InvalidChainInfo(format!("beacon secret: {e}")))?,
        );
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidChainInfo("beacon secret must be 32 bytes".into()))?;
        Ok(Self::from_secret(secret, genesis_time, period, clock))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(&self.secret[..])
    }

    pub fn chain(&self) -> &ChainInfo {
        &self.chain
    }

    fn sign(&self, round: u64) -> Vec<u8> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret[..])
            .expect("HMAC can take key of any size");
        mac.update(b"capsule-round:");
        mac.update(&round.to_be_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn check_chain(&self, chain: &ChainInfo) -> Result<()> {
        if chain.hash() != self.chain.hash() {
            return Err(Error::ForeignChain {
                expected: self.chain.hash_hex(),
                found: chain.hash_hex(),
            });
        }
        Ok(())
    }
}

fn round_cipher(signature: &[u8]) -> Result<ChaCha20Poly1305> {
    let hk = Hkdf::<Sha256>::new(None, signature);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(KEY_INFO, &mut key[..])
        .map_err(|_| Error::Encryption("HKDF expand failed".into()))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..])))
}

#[async_trait]
impl Beacon for LocalBeacon {
    async fn chain_info(&self) -> Result<ChainInfo> {
        Ok(self.chain.clone())
    }

    async fn round_signature(&self, round: u64) -> Result<RoundSignature> {
        if round == 0 {
            return Err(Error::Corrupt("round 0 does not exist".into()));
        }
        if self.clock.now() < self.chain.round_time(round) {
            return Err(Error::NotYetUnlocked { round });
        }
        Ok(RoundSignature {
            round,
            signature: self.sign(round),
        })
    }
}

impl TimelockScheme for LocalBeacon {
    fn scheme_id(&self) -> &str {
        LOCAL_SCHEME_ID
    }

    fn encrypt(&self, chain: &ChainInfo, round: u64, payload: &[u8]) -> Result<Vec<u8>> {
        self.check_chain(chain)?;
        let cipher = round_cipher(&self.sign(round))?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let round_aad = round.to_be_bytes();
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: &round_aad,
                },
            )
            .map_err(|_| Error::Encryption("ChaCha20-Poly1305 encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, chain: &ChainInfo, signature: &RoundSignature, body: &[u8]) -> Result<Vec<u8>> {
        self.check_chain(chain)?;
        if body.len() < NONCE_SIZE + 16 {
            return Err(Error::Corrupt("time-lock body truncated".into()));
        }
        let (nonce, sealed) = body.split_at(NONCE_SIZE);
        let cipher = round_cipher(&signature.signature)?;
        let round_aad = signature.round.to_be_bytes();
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &round_aad,
                },
            )
            .map_err(|_| Error::Corrupt("time-lock authentication failed".into()))
    }
}
