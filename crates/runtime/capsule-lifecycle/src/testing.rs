//! Shared test fixtures: a local beacon on tokio time, an in-memory ledger
//! that verifies notary signatures, beacon wrappers that count, stall or
//! fail on demand, and a ledger that answers too late.

use async_trait::async_trait;
use capsule_cipher::PasswordParams;
use capsule_core::{Capsule, CapsuleId, CapsuleRef, Clock, Principal, Visibility};
use capsule_ledger::{Ledger, LocalNotary, MemoryLedger, MintReceipt, NewCapsule, Notary, SubmitReceipt};
use capsule_timelock::{Beacon, ChainInfo, LocalBeacon, RoundSignature};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{SealMode, SealReceipt, SealRequest, Sealer, Services, TokioClock};

pub(crate) const GENESIS: i64 = 1_700_000_000;
pub(crate) const PERIOD: u64 = 3;

pub(crate) fn alice() -> Principal {
    Principal::new("0xa11ce").unwrap()
}

pub(crate) fn bob() -> Principal {
    Principal::new("0xb0b").unwrap()
}

/// Beacon wrapper that counts calls and can stall or fail
pub(crate) struct CountingBeacon {
    inner: Arc<LocalBeacon>,
    calls: AtomicU64,
    delay: Option<Duration>,
    failures_left: AtomicU32,
}

impl CountingBeacon {
    pub(crate) fn new(inner: Arc<LocalBeacon>) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            delay: None,
            failures_left: AtomicU32::new(0),
        }
    }

    /// Every round request takes `delay`.
    pub(crate) fn slow(inner: Arc<LocalBeacon>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(inner)
        }
    }

    /// The first `failures` round requests fail with a network error.
    pub(crate) fn flaky(inner: Arc<LocalBeacon>, failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            ..Self::new(inner)
        }
    }

    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Beacon for CountingBeacon {
    async fn chain_info(&self) -> capsule_timelock::Result<ChainInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.chain_info().await
    }

    async fn round_signature(&self, round: u64) -> capsule_timelock::Result<RoundSignature> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(capsule_timelock::Error::Network("connection reset".into()));
        }
        self.inner.round_signature(round).await
    }
}

/// Ledger that waits `delay` before every call
pub(crate) struct StalledLedger {
    inner: Arc<MemoryLedger>,
    delay: Duration,
}

impl StalledLedger {
    pub(crate) fn new(inner: Arc<MemoryLedger>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Ledger for StalledLedger {
    async fn resolve(&self, reference: &CapsuleRef) -> capsule_ledger::Result<CapsuleId> {
        tokio::time::sleep(self.delay).await;
        self.inner.resolve(reference).await
    }

    async fn capsule(&self, id: CapsuleId) -> capsule_ledger::Result<Capsule> {
        tokio::time::sleep(self.delay).await;
        self.inner.capsule(id).await
    }

    async fn content(&self, id: CapsuleId) -> capsule_ledger::Result<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.content(id).await
    }

    async fn access_balance(&self, id: CapsuleId, principal: &Principal) -> capsule_ledger::Result<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.access_balance(id, principal).await
    }

    async fn submit(&self, capsule: NewCapsule) -> capsule_ledger::Result<SubmitReceipt> {
        tokio::time::sleep(self.delay).await;
        self.inner.submit(capsule).await
    }

    async fn mint(&self, id: CapsuleId, to: &Principal) -> capsule_ledger::Result<MintReceipt> {
        tokio::time::sleep(self.delay).await;
        self.inner.mint(id, to).await
    }
}

/// Notary that refuses everyone
pub(crate) struct RefusingNotary;

#[async_trait]
impl Notary for RefusingNotary {
    async fn sign(&self, _principal: &Principal, _display_name: &str) -> capsule_ledger::Result<Vec<u8>> {
        Err(capsule_ledger::Error::SignatureRejected("verification failed".into()))
    }
}

pub(crate) struct Fixture {
    pub clock: Arc<TokioClock>,
    pub local: Arc<LocalBeacon>,
    pub beacon: Arc<CountingBeacon>,
    pub ledger: Arc<MemoryLedger>,
    pub notary: Arc<LocalNotary>,
}

impl Fixture {
    /// Must be called inside a (paused) tokio runtime.
    pub(crate) fn new() -> Self {
        Self::build(CountingBeacon::new, chrono::Duration::zero())
    }

    pub(crate) fn with_beacon(make: impl FnOnce(Arc<LocalBeacon>) -> CountingBeacon) -> Self {
        Self::build(make, chrono::Duration::zero())
    }

    /// Ledger content lags submission by `lag`.
    pub(crate) fn with_lag(lag: chrono::Duration) -> Self {
        Self::build(CountingBeacon::new, lag)
    }

    fn build(make: impl FnOnce(Arc<LocalBeacon>) -> CountingBeacon, lag: chrono::Duration) -> Self {
        let start = DateTime::from_timestamp(GENESIS + 1_000, 0).unwrap();
        let clock = Arc::new(TokioClock::starting_at(start));
        let local = Arc::new(LocalBeacon::from_secret([42; 32], GENESIS, PERIOD, clock.clone()));
        let beacon = Arc::new(make(local.clone()));
        let notary = Arc::new(LocalNotary::from_secret([9; 32]));
        let ledger = Arc::new(
            MemoryLedger::new(clock.clone())
                .with_lag(lag)
                .with_verifier(notary.clone()),
        );
        Self {
            clock,
            local,
            beacon,
            ledger,
            notary,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// One beacon period, for sleeping past a reveal round
    pub(crate) fn period(&self) -> u64 {
        PERIOD
    }

    pub(crate) fn services(&self) -> Services {
        Services::new(
            self.ledger.clone(),
            self.beacon.clone(),
            self.local.clone(),
            self.clock.clone(),
        )
    }

    pub(crate) fn sealer(&self) -> Sealer {
        Sealer::new(self.services(), self.notary.clone()).with_password_params(PasswordParams {
            memory_kib: 1024,
            iterations: 1,
            lanes: 1,
        })
    }

    /// Alice seals `message` to open `lead_secs` from now.
    pub(crate) fn request(&self, message: &str, lead_secs: i64, mode: SealMode) -> SealRequest {
        SealRequest {
            message: message.into(),
            author: "Alice".into(),
            principal: alice(),
            reveal_at: self.now() + chrono::Duration::seconds(lead_secs),
            mode,
        }
    }

    pub(crate) async fn seal(&self, message: &str, mode: SealMode, lead_secs: i64) -> SealReceipt {
        self.sealer()
            .seal(self.request(message, lead_secs, mode))
            .await
            .unwrap()
    }

    /// Seal `message` publicly, then record a second capsule whose envelope
    /// has one flipped byte. Needs a ledger without lag.
    pub(crate) async fn seal_tampered(&self, message: &str, lead_secs: i64) -> CapsuleId {
        let receipt = self.seal(message, SealMode::Public, lead_secs).await;
        let original = self.ledger.capsule(receipt.id).await.unwrap();
        let mut ciphertext = original.ciphertext().unwrap().to_vec();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        let signature = self.notary.sign(&alice(), "Alice").await.unwrap();
        self.ledger
            .submit(NewCapsule {
                author: "Alice".into(),
                author_principal: alice(),
                reveal_at: original.reveal_at(),
                visibility: Visibility::Public,
                ciphertext,
                max_supply: original.max_supply(),
                fee: 0,
                signature,
            })
            .await
            .unwrap()
            .id
    }
}
