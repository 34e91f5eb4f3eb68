//! Reveal engine
//!
//! Background driver for one [`RevealSession`]. Each concern is its own
//! [`PollTask`], all owned by the [`EngineHandle`] and aborted with it:
//!
//! ```text
//!  content-poll   every poll_interval   observe clock, fetch content once
//!                                       revealed, auto-decrypt, retry
//!  reveal-timer   once, at reveal_at    same step, without waiting a tick
//!  supply         every supply_interval refresh mint count
//!  identity       on change             re-evaluate access
//! ```
//!
//! Ticks before the reveal time only read the clock. The content poll ends
//! once the capsule is decrypted, fails for good, or has nothing left to do.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use capsule_core::Principal;
use tokio::sync::watch;

use crate::schedule::delay_until;
use crate::{AccessState, Credentials, DecryptAttempt, PollTask, RevealSession, RevealState};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub supply_interval: Duration,
    /// Used for automatic decrypts of private capsules
    pub credentials: Credentials,
    pub auto_decrypt: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            supply_interval: Duration::from_secs(15),
            credentials: Credentials::none(),
            auto_decrypt: true,
        }
    }
}

pub struct RevealEngine;

impl RevealEngine {
    /// Start every background task for `session`.
    pub fn spawn(session: Arc<RevealSession>, settings: EngineSettings) -> EngineHandle {
        let settings = Arc::new(settings);

        let mut poll = PollTask::new("content-poll");
        {
            let session = session.clone();
            let settings = settings.clone();
            poll.start(settings.poll_interval, move || {
                let session = session.clone();
                let settings = settings.clone();
                async move { reveal_step(&session, &settings).await }
            });
        }

        let mut reveal = PollTask::new("reveal-timer");
        {
            let session = session.clone();
            let settings = settings.clone();
            reveal.start_with(async move {
                if session.capsule().is_none() {
                    if let Err(e) = session.refresh().await {
                        tracing::warn!(capsule = %session.id(), error = %e, "could not load capsule");
                        return;
                    }
                }
                let Some(reveal_at) = session.capsule().map(|c| c.reveal_at()) else {
                    return;
                };
                tokio::time::sleep(delay_until(session.clock(), reveal_at)).await;
                tracing::info!(capsule = %session.id(), "reveal time reached");
                let _ = reveal_step(&session, &settings).await;
            });
        }

        let mut supply = PollTask::new("supply");
        {
            let session = session.clone();
            supply.start(settings.supply_interval, move || {
                let session = session.clone();
                async move {
                    if !session.is_relevant() {
                        return ControlFlow::Break(());
                    }
                    match session.refresh_supply().await {
                        Ok(remaining) => tracing::trace!(capsule = %session.id(), remaining, "supply refreshed"),
                        Err(e) => tracing::debug!(capsule = %session.id(), error = %e, "supply refresh failed"),
                    }
                    ControlFlow::Continue(())
                }
            });
        }

        tracing::debug!(capsule = %session.id(), "reveal engine started");
        EngineHandle {
            session,
            poll,
            reveal,
            supply,
            identity: PollTask::new("identity"),
        }
    }
}

/// One pass of the reveal loop.
async fn reveal_step(session: &RevealSession, settings: &EngineSettings) -> ControlFlow<()> {
    if !session.is_relevant() {
        return ControlFlow::Break(());
    }

    let state = match session.refresh().await {
        Ok(state) => state,
        Err(e) if e.is_retryable() => {
            tracing::debug!(capsule = %session.id(), error = %e, "refresh failed, retrying");
            return ControlFlow::Continue(());
        }
        Err(e) => {
            tracing::warn!(capsule = %session.id(), error = %e, "refresh failed");
            return ControlFlow::Break(());
        }
    };

    match state {
        RevealState::SealedFuture | RevealState::RevealPending | RevealState::Decrypting => {
            ControlFlow::Continue(())
        }
        RevealState::Decrypted | RevealState::DecryptFailed => ControlFlow::Break(()),
        RevealState::ContentAvailable => {
            if !settings.auto_decrypt {
                return ControlFlow::Break(());
            }
            let private = session.capsule().is_some_and(|c| c.visibility().is_private());
            if private {
                if !settings.credentials.has_password() {
                    return ControlFlow::Break(());
                }
                // wait for an identity that holds a token
                if session.access() != AccessState::Granted {
                    return ControlFlow::Continue(());
                }
            }

            match session.decrypt(&settings.credentials).await {
                Ok(DecryptAttempt::Done(_)) => ControlFlow::Break(()),
                Ok(DecryptAttempt::Coalesced) => ControlFlow::Continue(()),
                Err(e) if e.is_retryable() => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        }
    }
}

/// Owns the engine's tasks; dropping it tears the session down.
pub struct EngineHandle {
    session: Arc<RevealSession>,
    poll: PollTask,
    reveal: PollTask,
    supply: PollTask,
    identity: PollTask,
}

impl EngineHandle {
    pub fn session(&self) -> &Arc<RevealSession> {
        &self.session
    }

    /// Re-evaluate access whenever `rx` changes.
    pub fn watch_identity(&mut self, rx: watch::Receiver<Option<Principal>>) {
        self.identity
            .start_with(self.session.clone().watch_identity(rx));
    }

    pub fn is_running(&self) -> bool {
        [&self.poll, &self.reveal, &self.supply, &self.identity]
            .iter()
            .any(|task| task.is_active())
    }

    /// Tear down the session and abort every task.
    pub fn stop(&mut self) {
        self.session.teardown();
        for task in [&mut self.poll, &mut self.reveal, &mut self.supply, &mut self.identity] {
            task.stop();
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
        tracing::debug!(capsule = %self.session.id(), "reveal engine stopped");
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
