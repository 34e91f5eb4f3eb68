//! In-process ledger
//!
//! Holds capsules in memory and optionally mirrors them to a JSON snapshot
//! after every write. Two knobs make it useful as a test double:
//!
//! - **propagation lag**: content becomes readable only `lag` after sealing,
//!   the way a real node serves a record before its payload;
//! - **read counters**: every read call is counted, so tests can assert a
//!   code path made no ledger calls at all.

use async_trait::async_trait;
use capsule_core::{Capsule, CapsuleId, CapsuleParts, CapsuleRef, Clock, Principal};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, Ledger, LocalNotary, MintReceipt, NewCapsule, Result, SubmitReceipt};

/// Serializable ledger state
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerState {
    /// Version for migration support
    version: u32,
    next_id: u64,
    capsules: BTreeMap<u64, Capsule>,
    /// capsule id -> principal -> access tokens held
    holdings: BTreeMap<u64, BTreeMap<Principal, u64>>,
    fees_collected: u64,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            version: 1,
            next_id: 1,
            capsules: BTreeMap::new(),
            holdings: BTreeMap::new(),
            fees_collected: 0,
        }
    }
}

/// Read-call counts since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerReads {
    pub resolve: u64,
    pub capsule: u64,
    pub content: u64,
    pub access_balance: u64,
}

impl LedgerReads {
    pub fn total(&self) -> u64 {
        self.resolve + self.capsule + self.content + self.access_balance
    }
}

#[derive(Debug, Default)]
struct ReadCounters {
    resolve: AtomicU64,
    capsule: AtomicU64,
    content: AtomicU64,
    access_balance: AtomicU64,
}

/// In-memory ledger with optional file persistence
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    clock: Arc<dyn Clock>,
    lag: Duration,
    path: Option<PathBuf>,
    verifier: Option<Arc<LocalNotary>>,
    reads: ReadCounters,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            clock,
            lag: Duration::zero(),
            path: None,
            verifier: None,
            reads: ReadCounters::default(),
        }
    }

    /// Load the snapshot at `path` (empty ledger if absent) and save back to
    /// it after every write.
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&content).map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?
        } else {
            LedgerState::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            ..Self::new(clock)
        })
    }

    /// Content becomes readable `lag` after sealing.
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }

    /// Reject submissions whose signature this notary did not issue.
    pub fn with_verifier(mut self, notary: Arc<LocalNotary>) -> Self {
        self.verifier = Some(notary);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn reads(&self) -> LedgerReads {
        LedgerReads {
            resolve: self.reads.resolve.load(Ordering::Relaxed),
            capsule: self.reads.capsule.load(Ordering::Relaxed),
            content: self.reads.content.load(Ordering::Relaxed),
            access_balance: self.reads.access_balance.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.capsules.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.capsules.is_empty()
    }

    pub async fn fees_collected(&self) -> u64 {
        self.state.read().await.fees_collected
    }

    /// Every capsule, in id order.
    pub async fn list(&self) -> Vec<Capsule> {
        self.state.read().await.capsules.values().cloned().collect()
    }

    fn content_visible(&self, capsule: &Capsule) -> bool {
        self.clock.now() >= capsule.sealed_at() + self.lag
    }

    /// Save `next` and only then make it the live state, so a failed write
    /// leaves memory and disk agreeing.
    fn commit(&self, state: &mut LedgerState, next: LedgerState) -> Result<()> {
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let storage_err = |e: std::io::Error| Error::Storage(format!("{}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let content = serde_json::to_string_pretty(state).map_err(|e| Error::Storage(e.to_string()))?;

        // Write to temp file first, then rename (atomic)
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content).map_err(storage_err)?;
        std::fs::rename(&temp_path, path).map_err(storage_err)?;
        Ok(())
    }
}

fn not_found(reference: impl std::fmt::Display) -> Error {
    capsule_core::Error::NotFound(format!("capsule {reference}")).into()
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn resolve(&self, reference: &CapsuleRef) -> Result<CapsuleId> {
        self.reads.resolve.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        let found = match reference {
            CapsuleRef::Seq(n) => state.capsules.get(n),
            CapsuleRef::Short(short) => state.capsules.values().find(|c| c.short_id() == short),
            CapsuleRef::Uuid(uuid) => state.capsules.values().find(|c| c.uuid() == *uuid),
        };
        found.map(|c| c.id()).ok_or_else(|| not_found(reference))
    }

    async fn capsule(&self, id: CapsuleId) -> Result<Capsule> {
        self.reads.capsule.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        let capsule = state.capsules.get(&id.0).ok_or_else(|| not_found(id))?;
        if self.content_visible(capsule) {
            Ok(capsule.clone())
        } else {
            Ok(capsule.without_content())
        }
    }

    async fn content(&self, id: CapsuleId) -> Result<Option<Vec<u8>>> {
        self.reads.content.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        let capsule = state.capsules.get(&id.0).ok_or_else(|| not_found(id))?;
        if !self.content_visible(capsule) {
            return Ok(None);
        }
        Ok(capsule.ciphertext().map(<[u8]>::to_vec))
    }

    async fn access_balance(&self, id: CapsuleId, principal: &Principal) -> Result<u64> {
        self.reads.access_balance.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        if !state.capsules.contains_key(&id.0) {
            return Err(not_found(id));
        }
        Ok(state
            .holdings
            .get(&id.0)
            .and_then(|h| h.get(principal))
            .copied()
            .unwrap_or(0))
    }

    async fn submit(&self, new: NewCapsule) -> Result<SubmitReceipt> {
        if new.signature.is_empty() {
            return Err(Error::SignatureRejected("missing notary signature".into()));
        }
        if let Some(notary) = &self.verifier {
            if !notary.verify(&new.author_principal, &new.author, &new.signature) {
                return Err(Error::SignatureRejected("verification failed".into()));
            }
        }
        if new.ciphertext.is_empty() {
            return Err(Error::Rejected("empty ciphertext".into()));
        }

        let mut state = self.state.write().await;
        let sealed_at = self.clock.now();

        let mut uuid = Uuid::new_v4();
        let mut short_id = CapsuleRef::short_for(&uuid);
        while state.capsules.values().any(|c| c.short_id() == short_id) {
            uuid = Uuid::new_v4();
            short_id = CapsuleRef::short_for(&uuid);
        }

        let id = CapsuleId(state.next_id);
        let capsule = Capsule::from_parts(CapsuleParts {
            id,
            short_id: short_id.clone(),
            uuid,
            author: new.author,
            author_principal: new.author_principal.clone(),
            sealed_at,
            reveal_at: new.reveal_at,
            visibility: new.visibility,
            ciphertext: new.ciphertext,
            minted: 0,
            max_supply: new.max_supply,
        })?;

        let mut next = state.clone();
        next.next_id += 1;
        next.fees_collected += new.fee;
        next.capsules.insert(id.0, capsule);
        // the author always holds one access token
        next.holdings
            .entry(id.0)
            .or_default()
            .insert(new.author_principal, 1);
        self.commit(&mut state, next)?;

        tracing::info!(capsule = %id, short_id = %short_id, "capsule recorded");
        Ok(SubmitReceipt {
            id,
            short_id,
            uuid,
            sealed_at,
        })
    }

    async fn mint(&self, id: CapsuleId, to: &Principal) -> Result<MintReceipt> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let capsule = next.capsules.get_mut(&id.0).ok_or_else(|| not_found(id))?;
        let minted = capsule.record_mint()?;
        let remaining = capsule.remaining_supply();

        *next
            .holdings
            .entry(id.0)
            .or_default()
            .entry(to.clone())
            .or_insert(0) += 1;
        self.commit(&mut state, next)?;

        tracing::info!(capsule = %id, minted, remaining, "token minted");
        Ok(MintReceipt {
            id,
            minted,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::{ManualClock, Visibility};
    use chrono::{DateTime, Utc};

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn alice() -> Principal {
        Principal::new("0xa11ce").unwrap()
    }

    fn submission(visibility: Visibility, max_supply: u64) -> NewCapsule {
        NewCapsule {
            author: "Alice".into(),
            author_principal: alice(),
            reveal_at: start() + Duration::seconds(120),
            visibility,
            ciphertext: b"CTLK-sealed".to_vec(),
            max_supply,
            fee: 5,
            signature: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn test_submit_and_resolve_aliases() {
        let ledger = MemoryLedger::new(Arc::new(ManualClock::new(start())));
        let receipt = ledger.submit(submission(Visibility::Public, 10)).await.unwrap();

        assert_eq!(receipt.id, CapsuleId(1));
        assert_eq!(receipt.sealed_at, start());
        assert_eq!(ledger.resolve(&CapsuleRef::Seq(1)).await.unwrap(), receipt.id);
        assert_eq!(
            ledger.resolve(&CapsuleRef::Short(receipt.short_id.clone())).await.unwrap(),
            receipt.id
        );
        assert_eq!(ledger.resolve(&CapsuleRef::Uuid(receipt.uuid)).await.unwrap(), receipt.id);
        assert!(ledger.resolve(&CapsuleRef::Seq(2)).await.is_err());
        assert_eq!(ledger.fees_collected().await, 5);
    }

    #[tokio::test]
    async fn test_propagation_lag() {
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = MemoryLedger::new(clock.clone()).with_lag(Duration::seconds(30));
        let id = ledger.submit(submission(Visibility::Public, 10)).await.unwrap().id;

        assert_eq!(ledger.content(id).await.unwrap(), None);
        assert!(ledger.capsule(id).await.unwrap().ciphertext().is_none());

        clock.advance(Duration::seconds(30));
        assert_eq!(ledger.content(id).await.unwrap().unwrap(), b"CTLK-sealed");
        assert!(ledger.capsule(id).await.unwrap().ciphertext().is_some());

        assert_eq!(ledger.reads().content, 2);
        assert_eq!(ledger.reads().capsule, 2);
        assert_eq!(ledger.reads().total(), 4);
    }

    #[tokio::test]
    async fn test_mint_grants_access_until_exhausted() {
        let ledger = MemoryLedger::new(Arc::new(ManualClock::new(start())));
        let id = ledger.submit(submission(Visibility::Private, 2)).await.unwrap().id;
        let bob = Principal::new("0xb0b").unwrap();

        assert_eq!(ledger.access_balance(id, &alice()).await.unwrap(), 1);
        assert_eq!(ledger.access_balance(id, &bob).await.unwrap(), 0);

        let receipt = ledger.mint(id, &bob).await.unwrap();
        assert_eq!((receipt.minted, receipt.remaining), (1, 1));
        ledger.mint(id, &bob).await.unwrap();
        assert_eq!(ledger.access_balance(id, &bob).await.unwrap(), 2);

        let err = ledger.mint(id, &bob).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Capsule(capsule_core::Error::SupplyExhausted {
                minted: 2,
                max_supply: 2
            })
        ));
        assert_eq!(ledger.access_balance(id, &bob).await.unwrap(), 2);
        assert_eq!(ledger.capsule(id).await.unwrap().minted(), 2);
    }

    #[tokio::test]
    async fn test_rejects_reveal_not_after_seal() {
        let ledger = MemoryLedger::new(Arc::new(ManualClock::new(start())));
        let mut new = submission(Visibility::Public, 1);
        new.reveal_at = start();

        let err = ledger.submit(new).await.unwrap_err();
        assert!(matches!(err, Error::Capsule(capsule_core::Error::Validation(_))));
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_verifier_rejects_foreign_signature() {
        let notary = Arc::new(LocalNotary::generate());
        let ledger =
            MemoryLedger::new(Arc::new(ManualClock::new(start()))).with_verifier(notary.clone());

        let err = ledger.submit(submission(Visibility::Public, 1)).await.unwrap_err();
        assert!(matches!(err, Error::SignatureRejected(_)));

        let mut signed = submission(Visibility::Public, 1);
        signed.signature = crate::Notary::sign(notary.as_ref(), &alice(), "Alice").await.unwrap();
        ledger.submit(signed).await.unwrap();
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let clock = Arc::new(ManualClock::new(start()));

        let ledger = MemoryLedger::open(blocker.join("ledger.json"), clock.clone()).unwrap();
        for _ in 0..2 {
            let err = ledger.submit(submission(Visibility::Public, 1)).await.unwrap_err();
            assert!(matches!(err, Error::Storage(_)));
            assert!(!capsule_core::Error::from(err).is_retryable());
        }
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.fees_collected().await, 0);

        // disk becomes unwritable after a successful submit
        let sub = dir.path().join("sub");
        let ledger = MemoryLedger::open(sub.join("ledger.json"), clock).unwrap();
        let receipt = ledger.submit(submission(Visibility::Public, 3)).await.unwrap();
        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"not a directory").unwrap();

        assert!(ledger.mint(receipt.id, &alice()).await.is_err());
        assert_eq!(ledger.capsule(receipt.id).await.unwrap().minted(), 0);
        assert_eq!(ledger.access_balance(receipt.id, &alice()).await.unwrap(), 1);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let clock = Arc::new(ManualClock::new(start()));

        let receipt = {
            let ledger = MemoryLedger::open(&path, clock.clone()).unwrap();
            let receipt = ledger.submit(submission(Visibility::Private, 3)).await.unwrap();
            ledger.mint(receipt.id, &Principal::new("0xb0b").unwrap()).await.unwrap();
            receipt
        };
        assert!(path.exists());

        let reopened = MemoryLedger::open(&path, clock).unwrap();
        let capsule = reopened.capsule(receipt.id).await.unwrap();
        assert_eq!(capsule.uuid(), receipt.uuid);
        assert_eq!(capsule.minted(), 1);
        assert_eq!(capsule.ciphertext().unwrap(), b"CTLK-sealed");
        assert_eq!(
            reopened
                .access_balance(receipt.id, &Principal::new("0xB0B").unwrap())
                .await
                .unwrap(),
            1
        );

        let next = reopened.submit(submission(Visibility::Public, 1)).await.unwrap();
        assert_eq!(next.id, CapsuleId(2));
    }
}
