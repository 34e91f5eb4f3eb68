//! Per-capsule reveal session
//!
//! A [`RevealSession`] owns everything derived about one capsule: the record,
//! the ciphertext once seen, the state machine, the access verdict and the
//! cached outcome. Background tasks share it through an `Arc`; its flags are
//! atomics so no task needs the lock across an await.
//!
//! ```text
//!  decrypt(credentials)
//!    1. cached plaintext ............................ return, no calls
//!    2. now < reveal_at ............................. NotYetUnlocked, no calls
//!    3. content not on the ledger yet ............... ContentUnavailable
//!    4. private: identity / token / password ........ IdentityRequired,
//!                                                     AccessDenied,
//!                                                     MissingPassword
//!    5. another decrypt in flight ................... Coalesced
//!    6. time-lock open ─► inner payload ─► plaintext
//! ```

use capsule_core::{
    Capsule, CapsuleId, CapsuleRef, Clock, Error, Principal, Result, Service, ValidationError,
};
use capsule_timelock::{timelock_open, TimelockCiphertext};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::{access, timed, AccessState, Credentials, DecryptOutcome, InnerPayload, Lifecycle, RevealState, Services};

/// What a decrypt call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptAttempt {
    /// Plaintext, fresh or cached
    Done(String),
    /// Another decrypt for this capsule was already running; nothing was done
    Coalesced,
}

#[derive(Debug, Default)]
struct SessionInner {
    capsule: Option<Capsule>,
    content: Option<Vec<u8>>,
    lifecycle: Lifecycle,
    access: AccessState,
    principal: Option<Principal>,
    outcome: DecryptOutcome,
}

/// Releases the single-flight flag however the decrypt ends
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owned reveal context for one capsule
pub struct RevealSession {
    id: CapsuleId,
    services: Services,
    inner: Mutex<SessionInner>,
    in_flight: AtomicBool,
    relevant: AtomicBool,
    decrypts: AtomicU64,
}

impl RevealSession {
    pub fn new(id: CapsuleId, services: Services) -> Self {
        Self {
            id,
            services,
            inner: Mutex::new(SessionInner::default()),
            in_flight: AtomicBool::new(false),
            relevant: AtomicBool::new(true),
            decrypts: AtomicU64::new(0),
        }
    }

    /// Resolve any alias and load the record.
    pub async fn open(reference: &CapsuleRef, services: Services) -> Result<Self> {
        let id = timed(
            Service::Ledger,
            services.call_timeout,
            services.ledger.resolve(reference),
        )
        .await?;
        let session = Self::new(id, services);
        session.refresh().await?;
        Ok(session)
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> CapsuleId {
        self.id
    }

    pub fn clock(&self) -> &dyn Clock {
        self.services.clock.as_ref()
    }

    pub fn state(&self) -> RevealState {
        self.inner().lifecycle.state()
    }

    pub fn access(&self) -> AccessState {
        self.inner().access
    }

    pub fn outcome(&self) -> DecryptOutcome {
        self.inner().outcome.clone()
    }

    pub fn plaintext(&self) -> Option<String> {
        self.inner().outcome.plaintext().map(str::to_string)
    }

    /// Retryable decrypt failures so far
    pub fn retries(&self) -> u32 {
        self.inner().lifecycle.retries()
    }

    /// Cryptographic decrypts actually executed
    pub fn decrypt_count(&self) -> u64 {
        self.decrypts.load(Ordering::Relaxed)
    }

    /// Latest record, without its ciphertext
    pub fn capsule(&self) -> Option<Capsule> {
        self.inner().capsule.clone()
    }

    pub fn has_content(&self) -> bool {
        self.inner().content.is_some()
    }

    pub fn principal(&self) -> Option<Principal> {
        self.inner().principal.clone()
    }

    pub fn is_relevant(&self) -> bool {
        self.relevant.load(Ordering::Acquire)
    }

    /// Mark the session as abandoned. Calls still in flight complete, but
    /// their results are no longer recorded.
    pub fn teardown(&self) {
        if self.relevant.swap(false, Ordering::AcqRel) {
            tracing::debug!(capsule = %self.id, "reveal session torn down");
        }
    }

    /// Beacon round named in the held ciphertext, read from its header.
    pub fn reveal_round(&self) -> Option<u64> {
        let inner = self.inner();
        let content = inner.content.as_deref()?;
        TimelockCiphertext::from_bytes(content).ok().map(|c| c.round())
    }

    fn absorb_record(&self, record: Capsule) {
        let now = self.services.clock.now();
        let mut inner = self.inner();
        if let Some(ciphertext) = record.ciphertext() {
            if inner.content.is_none() {
                inner.content = Some(ciphertext.to_vec());
            }
            inner.lifecycle.observe_content();
        }
        inner.lifecycle.observe_time(now, record.reveal_at());
        inner.capsule = Some(record.without_content());
    }

    fn observe_time(&self) {
        let now = self.services.clock.now();
        let mut inner = self.inner();
        if let Some(reveal_at) = inner.capsule.as_ref().map(Capsule::reveal_at) {
            inner.lifecycle.observe_time(now, reveal_at);
        }
    }

    /// Load the record if not yet known, observe the clock, and poll for
    /// content once the reveal time has passed.
    pub async fn refresh(&self) -> Result<RevealState> {
        if self.capsule().is_none() {
            let record = timed(
                Service::Ledger,
                self.services.call_timeout,
                self.services.ledger.capsule(self.id),
            )
            .await?;
            if !self.is_relevant() {
                return Ok(self.state());
            }
            self.absorb_record(record);
        }

        self.observe_time();
        if self.state() == RevealState::RevealPending && !self.has_content() {
            self.poll_content().await?;
        }
        Ok(self.state())
    }

    /// One content request, skipped when content is already held.
    pub async fn poll_content(&self) -> Result<bool> {
        if self.has_content() {
            return Ok(true);
        }
        let content = timed(
            Service::Ledger,
            self.services.call_timeout,
            self.services.ledger.content(self.id),
        )
        .await?;
        if !self.is_relevant() {
            return Ok(false);
        }

        match content {
            Some(bytes) if !bytes.is_empty() => {
                {
                    let mut inner = self.inner();
                    inner.content = Some(bytes);
                    inner.lifecycle.observe_content();
                }
                tracing::debug!(capsule = %self.id, "content available");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Re-read the record for the current mint count; returns remaining supply.
    pub async fn refresh_supply(&self) -> Result<u64> {
        let record = timed(
            Service::Ledger,
            self.services.call_timeout,
            self.services.ledger.capsule(self.id),
        )
        .await?;
        let remaining = record.remaining_supply();
        if self.is_relevant() {
            self.absorb_record(record);
        }
        Ok(remaining)
    }

    /// Switch identity and re-evaluate access.
    pub async fn set_identity(&self, principal: Option<Principal>) -> Result<AccessState> {
        {
            let mut inner = self.inner();
            inner.principal = principal;
            inner.access = AccessState::Unknown;
        }
        self.refresh_access().await
    }

    pub async fn refresh_access(&self) -> Result<AccessState> {
        if self.capsule().is_none() {
            self.refresh().await?;
        }
        let capsule = self
            .capsule()
            .ok_or_else(|| Error::NotFound(format!("capsule {}", self.id)))?;
        let principal = self.principal();

        let verdict = timed(
            Service::Ledger,
            self.services.call_timeout,
            access::evaluate(self.services.ledger.as_ref(), &capsule, principal.as_ref()),
        )
        .await?;

        if self.is_relevant() {
            let mut inner = self.inner();
            // identity may have changed while the balance was in flight
            if inner.principal == principal {
                inner.access = verdict;
            }
        }
        Ok(verdict)
    }

    /// Follow an identity feed until it closes or the session is torn down.
    pub async fn watch_identity(self: Arc<Self>, mut rx: watch::Receiver<Option<Principal>>) {
        loop {
            let principal = rx.borrow_and_update().clone();
            if let Err(e) = self.set_identity(principal).await {
                tracing::warn!(capsule = %self.id, error = %e, "access check failed");
            }
            if !self.is_relevant() || rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Attempt to recover the plaintext.
    pub async fn decrypt(&self, credentials: &Credentials) -> Result<DecryptAttempt> {
        if let Some(text) = self.plaintext() {
            return Ok(DecryptAttempt::Done(text));
        }

        if self.capsule().is_none() {
            self.refresh().await?;
        }
        let capsule = self
            .capsule()
            .ok_or_else(|| Error::NotFound(format!("capsule {}", self.id)))?;

        let now = self.services.clock.now();
        self.observe_time();
        if !capsule.is_revealed_at(now) {
            let round = self.reveal_round().unwrap_or(0);
            tracing::debug!(capsule = %self.id, round, "decrypt requested before reveal time");
            return Err(Error::NotYetUnlocked { round });
        }

        if !self.poll_content().await? {
            return Err(Error::ContentUnavailable);
        }

        if capsule.visibility().is_private() {
            let mut verdict = self.access();
            if verdict != AccessState::Granted && self.principal().is_some() {
                verdict = self.refresh_access().await?;
            }
            verdict.require(self.id)?;
            if !credentials.has_password() {
                return Err(ValidationError::MissingPassword.into());
            }
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(capsule = %self.id, "decrypt already in flight");
            return Ok(DecryptAttempt::Coalesced);
        }
        let _flight = FlightGuard(&self.in_flight);

        if let Some(text) = self.plaintext() {
            return Ok(DecryptAttempt::Done(text));
        }
        let ciphertext = self.inner().content.clone().ok_or(Error::ContentUnavailable)?;
        self.inner().lifecycle.begin_decrypt()?;

        self.decrypts.fetch_add(1, Ordering::Relaxed);
        let result = self.open_layers(&ciphertext, credentials).await;

        if !self.is_relevant() {
            tracing::debug!(capsule = %self.id, "discarding decrypt result after teardown");
            return result.map(DecryptAttempt::Done);
        }
        {
            let mut inner = self.inner();
            inner.lifecycle.finish_decrypt(&result)?;
            inner.outcome = match &result {
                Ok(text) => DecryptOutcome::Success(text.clone()),
                Err(e) => DecryptOutcome::Failed(e.clone()),
            };
        }

        match &result {
            Ok(_) => tracing::info!(capsule = %self.id, "capsule decrypted"),
            Err(e) if e.is_retryable() => {
                tracing::debug!(capsule = %self.id, error = %e, retries = self.retries(), "decrypt will be retried")
            }
            Err(e) => tracing::warn!(capsule = %self.id, error = %e, gate = ?e.gate(), "decrypt failed"),
        }
        result.map(DecryptAttempt::Done)
    }

    async fn open_layers(&self, ciphertext: &[u8], credentials: &Credentials) -> Result<String> {
        let payload = timed(
            Service::Beacon,
            self.services.call_timeout,
            timelock_open(
                ciphertext,
                self.services.beacon.as_ref(),
                self.services.scheme.as_ref(),
            ),
        )
        .await?;
        InnerPayload::decode(&payload)?.open(credentials)
    }
}
