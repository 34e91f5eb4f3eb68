//! drand identity-based time-lock
//!
//! Encrypts to the identity of a future round on an unchained drand network.
//! Sealing needs only the chain's public key; opening needs the round
//! signature, which the network's threshold group publishes at the round's
//! time and no single node can produce earlier.
//!
//! ```text
//!  k  = 16 random bytes
//!  body = len(u16) | IBE(pk, round, k) | nonce | ChaCha20-Poly1305(HKDF(k), payload, aad = round)
//! ```
//!
//! The IBE layer follows drand's tlock construction, so capsules sealed here
//! open with any tlock implementation that reads the key the same way.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{ChainInfo, Error, Result, RoundSignature, TimelockScheme};

/// quicknet: G1 signatures, RFC 9380 hash-to-curve, 3s rounds
pub const QUICKNET_SCHEME_ID: &str = "bls-unchained-g1-rfc9380";
/// Unchained G2 signatures
pub const UNCHAINED_SCHEME_ID: &str = "pedersen-bls-unchained";

pub const QUICKNET_CHAIN_HASH: &str = "52db9ba70e0cc0f6eaf7803dd07447a1f5477735fd3f661792ba94600c84e971";

const DATA_KEY_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_INFO: &[u8] = b"capsule-drand-timelock-v1";

/// Time-lock scheme for unchained drand networks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrandScheme {
    scheme_id: String,
}

impl DrandScheme {
    pub fn quicknet() -> Self {
        Self {
            scheme_id: QUICKNET_SCHEME_ID.to_string(),
        }
    }

    /// Scheme for whatever `chain` advertises, if it is unchained.
    pub fn for_chain(chain: &ChainInfo) -> Result<Self> {
        Self::new(chain.scheme_id())
    }

    /// Chained networks sign over the previous round, so their future
    /// signatures have no fixed identity to encrypt to and are refused.
    pub fn new(scheme_id: &str) -> Result<Self> {
        match scheme_id {
            QUICKNET_SCHEME_ID | UNCHAINED_SCHEME_ID => Ok(Self {
                scheme_id: scheme_id.to_string(),
            }),
            other => Err(Error::SchemeMismatch {
                expected: format!("{QUICKNET_SCHEME_ID} or {UNCHAINED_SCHEME_ID}"),
                found: other.to_string(),
            }),
        }
    }
}

impl Default for DrandScheme {
    fn default() -> Self {
        Self::quicknet()
    }
}

fn data_cipher(data_key: &[u8]) -> Result<ChaCha20Poly1305> {
    let hk = Hkdf::<Sha256>::new(None, data_key);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(KEY_INFO, &mut key[..])
        .map_err(|_| Error::Encryption("HKDF expand failed".into()))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..])))
}

impl TimelockScheme for DrandScheme {
    fn scheme_id(&self) -> &str {
        &self.scheme_id
    }

    fn encrypt(&self, chain: &ChainInfo, round: u64, payload: &[u8]) -> Result<Vec<u8>> {
        if chain.public_key().is_empty() {
            return Err(Error::InvalidChainInfo("chain has no public key".into()));
        }
        let mut data_key = Zeroizing::new([0u8; DATA_KEY_SIZE]);
        OsRng.fill_bytes(&mut data_key[..]);

        let mut wrapped = Vec::new();
        tlock::encrypt(&mut wrapped, &data_key[..], chain.public_key(), round)
            .map_err(|e| Error::Encryption(format!("identity encryption: {e}")))?;
        let wrapped_len = u16::try_from(wrapped.len())
            .map_err(|_| Error::Encryption("wrapped key too large".into()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let round_aad = round.to_be_bytes();
        let sealed = data_cipher(&data_key[..])?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: &round_aad,
                },
            )
            .map_err(|_| Error::Encryption("ChaCha20-Poly1305 encryption failed".into()))?;

        let mut out = Vec::with_capacity(2 + wrapped.len() + NONCE_SIZE + sealed.len());
        out.extend_from_slice(&wrapped_len.to_be_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, _chain: &ChainInfo, signature: &RoundSignature, body: &[u8]) -> Result<Vec<u8>> {
        let (wrapped, nonce, sealed) = split_body(body)?;

        let mut data_key = Zeroizing::new(Vec::with_capacity(DATA_KEY_SIZE));
        tlock::decrypt(&mut *data_key, wrapped, &signature.signature)
            .map_err(|e| Error::Corrupt(format!("identity decryption: {e}")))?;
        if data_key.len() != DATA_KEY_SIZE {
            return Err(Error::Corrupt("unwrapped key has the wrong size".into()));
        }

        let round_aad = signature.round.to_be_bytes();
        data_cipher(&data_key[..])?
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

fn split_body(body: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    let truncated = || Error::Corrupt("time-lock body truncated".into());
    let (len, rest) = body.split_first_chunk::<2>().ok_or_else(truncated)?;
    let wrapped_len = usize::from(u16::from_be_bytes(*len));
    if rest.len() < wrapped_len + NONCE_SIZE + TAG_SIZE {
        return Err(truncated());
    }
    let (wrapped, rest) = rest.split_at(wrapped_len);
    let (nonce, sealed) = rest.split_at(NONCE_SIZE);
    Ok((wrapped, nonce, sealed))
}
