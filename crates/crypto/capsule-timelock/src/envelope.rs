//! Time-lock ciphertext envelope
//!
//! ```text
//! ┌──────┬─────────┬──────────┬────────────┬──────────────┬──────────┐
//! │ CTLK │ version │ hash len │ chain hash │ round (u64BE)│   body   │
//! │  4B  │   1B    │    1B    │   n bytes  │      8B      │   rest   │
//! └──────┴─────────┴──────────┴────────────┴──────────────┴──────────┘
//! ```
//!
//! The header is readable without any key, which is how `timelock_open`
//! learns which round to fetch.

use crate::{Error, Result};

const MAGIC: &[u8; 4] = b"CTLK";
const VERSION: u8 = 1;

/// Parsed time-lock ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelockCiphertext {
    chain_hash: Vec<u8>,
    round: u64,
    body: Vec<u8>,
}

impl TimelockCiphertext {
    pub fn new(chain_hash: Vec<u8>, round: u64, body: Vec<u8>) -> Result<Self> {
        if chain_hash.is_empty() || chain_hash.len() > u8::MAX as usize {
            return Err(Error::Corrupt(format!(
                "chain hash length {} out of range",
                chain_hash.len()
            )));
        }
        Ok(Self {
            chain_hash,
            round,
            body,
        })
    }

    pub fn chain_hash(&self) -> &[u8] {
        &self.chain_hash
    }

    /// Round whose signature unlocks this ciphertext
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 1 + 1 + self.chain_hash.len() + 8 + self.body.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        // length bounded in `new`
        out.push(self.chain_hash.len() as u8);
        out.extend_from_slice(&self.chain_hash);
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(Error::Corrupt("envelope truncated".into()));
        }
        if &bytes[..4] != MAGIC {
            return Err(Error::Corrupt("not a time-lock envelope".into()));
        }
        if bytes[4] != VERSION {
            return Err(Error::Corrupt(format!("unsupported envelope version {}", bytes[4])));
        }
        let hash_len = bytes[5] as usize;
        let rest = &bytes[6..];
        if hash_len == 0 || rest.len() < hash_len + 8 {
            return Err(Error::Corrupt("envelope truncated".into()));
        }
        let (chain_hash, rest) = rest.split_at(hash_len);
        let (round, body) = rest.split_at(8);
        let mut round_bytes = [0u8; 8];
        round_bytes.copy_from_slice(round);

        Ok(Self {
            chain_hash: chain_hash.to_vec(),
            round: u64::from_be_bytes(round_bytes),
            body: body.to_vec(),
        })
    }
}
