//! Beacon chain parameters and round arithmetic
//!
//! ```text
//!  genesis                                       target_time
//!     │ period │ period │ period │ period │            │
//!     ▼        ▼        ▼        ▼        ▼            ▼
//!  round 1  round 2  round 3  round 4  round 5 ... ─► first round
//!                                                     emitted at or
//!                                                     after target
//! ```
//!
//! Round 1 is emitted at genesis. Round `r` is emitted at
//! `genesis + (r - 1) * period`.

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Static beacon parameters, cacheable for the lifetime of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    hash: Vec<u8>,
    public_key: Vec<u8>,
    genesis_time: i64,
    period: u64,
    scheme_id: String,
    beacon_id: Option<String>,
}

impl ChainInfo {
    pub fn new(
        hash: Vec<u8>,
        public_key: Vec<u8>,
        genesis_time: i64,
        period: u64,
        scheme_id: impl Into<String>,
    ) -> Result<Self> {
        if period == 0 {
            return Err(Error::InvalidChainInfo("period must be positive".into()));
        }
        if hash.is_empty() || hash.len() > u8::MAX as usize {
            return Err(Error::InvalidChainInfo(format!(
                "chain hash length {} out of range",
                hash.len()
            )));
        }
        Ok(Self {
            hash,
            public_key,
            genesis_time,
            period,
            scheme_id: scheme_id.into(),
            beacon_id: None,
        })
    }

    /// Skips validation; callers guarantee a 1..=255 byte hash and a
    /// positive period.
    pub(crate) fn trusted(
        hash: Vec<u8>,
        public_key: Vec<u8>,
        genesis_time: i64,
        period: u64,
        scheme_id: &str,
    ) -> Self {
        Self {
            hash,
            public_key,
            genesis_time,
            period,
            scheme_id: scheme_id.to_string(),
            beacon_id: None,
        }
    }

    pub fn with_beacon_id(mut self, beacon_id: impl Into<String>) -> Self {
        self.beacon_id = Some(beacon_id.into());
        self
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn genesis_time(&self) -> i64 {
        self.genesis_time
    }

    /// Seconds between rounds
    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn scheme_id(&self) -> &str {
        &self.scheme_id
    }

    pub fn beacon_id(&self) -> Option<&str> {
        self.beacon_id.as_deref()
    }

    /// Scheduled emission time of `round` (round 0 is treated as round 1).
    pub fn round_time(&self, round: u64) -> DateTime<Utc> {
        let offset = round.saturating_sub(1).saturating_mul(self.period);
        let secs = self
            .genesis_time
            .saturating_add(i64::try_from(offset).unwrap_or(i64::MAX));
        DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Latest round emitted at `t`, 0 before genesis.
    pub fn round_at(&self, t: DateTime<Utc>) -> u64 {
        let elapsed = t.timestamp() - self.genesis_time;
        if elapsed < 0 {
            return 0;
        }
        elapsed as u64 / self.period + 1
    }

    /// Smallest round whose emission time is at or after `t`.
    pub fn target_round(&self, t: DateTime<Utc>) -> u64 {
        // A fractional second still has to wait for the next whole second.
        let secs = t.timestamp() + i64::from(t.timestamp_subsec_nanos() > 0);
        let elapsed = secs - self.genesis_time;
        if elapsed <= 0 {
            return 1;
        }
        (elapsed as u64).div_ceil(self.period) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn info() -> ChainInfo {
        ChainInfo::new(vec![0xAB; 32], vec![1; 48], 1_000, 30, "test").unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_round_time() {
        let chain = info();
        assert_eq!(chain.round_time(1), at(1_000));
        assert_eq!(chain.round_time(2), at(1_030));
        assert_eq!(chain.round_time(0), at(1_000));
    }

    #[test]
    fn test_round_at() {
        let chain = info();
        assert_eq!(chain.round_at(at(999)), 0);
        assert_eq!(chain.round_at(at(1_000)), 1);
        assert_eq!(chain.round_at(at(1_029)), 1);
        assert_eq!(chain.round_at(at(1_030)), 2);
    }

    #[test]
    fn test_target_round_is_first_at_or_after() {
        let chain = info();
        assert_eq!(chain.target_round(at(500)), 1);
        assert_eq!(chain.target_round(at(1_000)), 1);
        assert_eq!(chain.target_round(at(1_001)), 2);
        assert_eq!(chain.target_round(at(1_030)), 2);
        assert_eq!(chain.target_round(at(1_031)), 3);

        for t in 1_000..1_200 {
            let round = chain.target_round(at(t));
            assert!(chain.round_time(round) >= at(t));
            assert!(chain.round_time(round - 1) < at(t) || round == 1);
        }
    }

    #[test]
    fn test_target_round_rounds_up_subsecond() {
        let chain = info();
        let t = at(1_030) + Duration::milliseconds(1);
        assert_eq!(chain.target_round(t), 3);
    }

    #[test]
    fn test_rejects_zero_period() {
        assert!(ChainInfo::new(vec![1], vec![], 0, 0, "test").is_err());
        assert!(ChainInfo::new(vec![], vec![], 0, 3, "test").is_err());
    }
}
