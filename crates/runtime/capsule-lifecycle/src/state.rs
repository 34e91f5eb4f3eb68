//! Reveal State Machine
//!
//! A capsule's observable state is a function of wall-clock time and of what
//! the ledger has served so far. The machine only moves forward, except for
//! the retry loop around `Decrypting`.
//!
//! ```text
//!  SealedFuture ──now ≥ reveal_at──► RevealPending ──content──► ContentAvailable
//!                                                                 │      ▲
//!                                                    access granted│      │retryable
//!                                                                 ▼      │
//!                                        DecryptFailed ◄──fatal── Decrypting
//!                                              │                   │
//!                                              └──── re-entry ─────┤
//!                                                                  ▼
//!                                                              Decrypted
//! ```

use capsule_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a capsule stands on the way to plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevealState {
    /// Reveal time not reached
    SealedFuture,

    /// Reveal time reached, ledger content not seen yet
    RevealPending,

    /// Ciphertext held, ready to decrypt
    ContentAvailable,

    /// A decrypt is in flight
    Decrypting,

    /// Plaintext recovered (terminal)
    Decrypted,

    /// Last attempt failed for a reason retrying will not fix
    DecryptFailed,
}

impl RevealState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Decrypted)
    }

    /// Valid next states from this state
    pub fn valid_transitions(&self) -> &'static [RevealState] {
        use RevealState::*;

        match self {
            SealedFuture => &[RevealPending],
            RevealPending => &[ContentAvailable],
            ContentAvailable => &[Decrypting],
            Decrypting => &[Decrypted, ContentAvailable, DecryptFailed],
            DecryptFailed => &[Decrypting],
            Decrypted => &[Decrypted],
        }
    }

    pub fn can_transition_to(&self, next: RevealState) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::SealedFuture => "Sealed until the reveal time",
            Self::RevealPending => "Revealed, waiting for ledger content",
            Self::ContentAvailable => "Content available",
            Self::Decrypting => "Decrypting",
            Self::Decrypted => "Decrypted",
            Self::DecryptFailed => "Decrypt failed",
        }
    }
}

impl std::fmt::Display for RevealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Orthogonal access dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessState {
    /// No identity connected (private capsules only)
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Result of the most recent decrypt, with "never tried" kept distinct from
/// an empty plaintext.
#[derive(Debug, Clone, Default)]
pub enum DecryptOutcome {
    #[default]
    NotAttempted,
    Success(String),
    Failed(Error),
}

impl DecryptOutcome {
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            Self::Success(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Validated reveal state plus the counters that go with it
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: RevealState,
    content_seen: bool,
    retries: u32,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RevealState::SealedFuture,
            content_seen: false,
            retries: 0,
        }
    }

    pub fn state(&self) -> RevealState {
        self.state
    }

    /// Retryable failures seen so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn content_seen(&self) -> bool {
        self.content_seen
    }

    /// Move to `next`, rejecting anything the diagram does not allow.
    pub fn transition(&mut self, next: RevealState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(from = %self.state, to = %next, "reveal transition");
        self.state = next;
        Ok(())
    }

    /// Advance on the clock alone.
    pub fn observe_time(&mut self, now: DateTime<Utc>, reveal_at: DateTime<Utc>) {
        if self.state == RevealState::SealedFuture && now >= reveal_at {
            self.state = RevealState::RevealPending;
            if self.content_seen {
                self.state = RevealState::ContentAvailable;
            }
        }
    }

    /// Record that the ledger served non-empty content. Content seen before
    /// the reveal time is kept and applied when the time comes.
    pub fn observe_content(&mut self) {
        self.content_seen = true;
        if self.state == RevealState::RevealPending {
            self.state = RevealState::ContentAvailable;
        }
    }

    pub fn begin_decrypt(&mut self) -> Result<()> {
        self.transition(RevealState::Decrypting)
    }

    /// Close a decrypt attempt.
    pub fn finish_decrypt<T>(&mut self, result: &Result<T>) -> Result<()> {
        match result {
            Ok(_) => self.transition(RevealState::Decrypted),
            Err(e) if e.is_retryable() => {
                self.retries += 1;
                self.transition(RevealState::ContentAvailable)
            }
            Err(_) => self.transition(RevealState::DecryptFailed),
        }
    }
}
