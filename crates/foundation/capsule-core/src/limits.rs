//! Sealing limits
//!
//! Checked before any encryption or network call so that doomed input never
//! costs a beacon round-trip.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Longest message accepted, in characters (the ledger's own limit)
pub const MAX_MESSAGE_CHARS: usize = 7777;

/// Minimum distance between submission and reveal, in seconds
pub const MIN_REVEAL_LEAD_SECS: i64 = 60;

/// Default derivation supply for a new capsule
pub const DEFAULT_MAX_SUPPLY: u64 = 100;

/// Input limits applied when sealing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealLimits {
    pub max_message_chars: usize,
    pub min_lead_secs: i64,
}

impl Default for SealLimits {
    fn default() -> Self {
        Self {
            max_message_chars: MAX_MESSAGE_CHARS,
            min_lead_secs: MIN_REVEAL_LEAD_SECS,
        }
    }
}

impl SealLimits {
    /// Reject empty or oversized messages.
    ///
    /// Length is counted in `char`s, not bytes.
    pub fn check_message(&self, message: &str) -> Result<(), ValidationError> {
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let chars = message.chars().count();
        if chars > self.max_message_chars {
            return Err(ValidationError::MessageTooLong {
                chars,
                max: self.max_message_chars,
            });
        }
        Ok(())
    }

    /// Reject reveal times that are not after `now`, or closer than the lead.
    pub fn check_reveal_at(
        &self,
        now: DateTime<Utc>,
        reveal_at: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if reveal_at <= now {
            return Err(ValidationError::RevealNotAfterSeal {
                sealed_at: now,
                reveal_at,
            });
        }
        let earliest = now + Duration::seconds(self.min_lead_secs);
        if reveal_at < earliest {
            return Err(ValidationError::RevealTooSoon { reveal_at, earliest });
        }
        Ok(())
    }
}
