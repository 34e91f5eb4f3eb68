//! # Capsule Lifecycle
//!
//! Everything between "the user typed a message" and "a reader sees it":
//!
//! ```text
//!  SEAL                                   REVEAL
//!  ────                                   ──────
//!  validate (no network)                  RevealSession (per capsule)
//!     │                                     ├─ Lifecycle state machine
//!  notary.sign                              ├─ access gate (identity + tokens)
//!     │                                     ├─ single-flight decrypt
//!  inner layer (plain | password | key)     └─ cached outcome
//!     │                                            ▲
//!  timelock_seal(reveal_at)               RevealEngine
//!     │                                     ├─ content poll     (1s)
//!  ledger.submit                            ├─ reveal timer     (reveal_at)
//!                                           ├─ supply refresh   (15s)
//!                                           └─ auto-decrypt for public capsules
//! ```
//!
//! Every external collaborator is injected through [`Services`]; nothing in
//! this crate knows whether the ledger is a file or a chain node.

pub mod access;
pub mod engine;
pub mod identity;
pub mod mint;
pub mod payload;
pub mod schedule;
pub mod seal;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineHandle, EngineSettings, RevealEngine};
pub use identity::{AuthCallback, IdentityProvider, SessionIdentity};
pub use mint::mint;
pub use payload::{Credentials, InnerPayload};
pub use schedule::{PollTask, TokioClock};
pub use seal::{SealMode, SealReceipt, SealRequest, Sealer};
pub use session::{DecryptAttempt, RevealSession};
pub use state::{AccessState, DecryptOutcome, Lifecycle, RevealState};

use capsule_core::{Clock, Error, Result, Service};
use capsule_ledger::Ledger;
use capsule_timelock::{Beacon, TimelockScheme};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on any single ledger, beacon or notary call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators shared by every session
#[derive(Clone)]
pub struct Services {
    pub ledger: Arc<dyn Ledger>,
    pub beacon: Arc<dyn Beacon>,
    pub scheme: Arc<dyn TimelockScheme>,
    pub clock: Arc<dyn Clock>,
    pub call_timeout: Duration,
}

impl Services {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        beacon: Arc<dyn Beacon>,
        scheme: Arc<dyn TimelockScheme>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            beacon,
            scheme,
            clock,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Bound `fut` by `timeout`; expiry is a retryable network failure.
pub(crate) async fn timed<T, E, F>(service: Service, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(%service, ?timeout, "call timed out");
            Err(Error::network(service, format!("timed out after {:?}", timeout)))
        }
    }
}
