//! # Capsule Ledger
//!
//! The append-only record store capsules live on, and the notary that
//! authorizes new entries. Both are reached through traits so the runtime
//! never knows whether it is talking to a chain node or a local file.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!  resolve ─►│                              │◄─ submit(NewCapsule + signature)
//!  capsule ─►│           Ledger             │◄─ mint(id, recipient)
//!  content ─►│  (may lag behind submission) │
//!  balance ─►│                              │
//!            └──────────────────────────────┘
//!                 ▲                    ▲
//!           MemoryLedger           RpcLedger
//!         (JSON snapshot)        (JSON-RPC 2.0)
//! ```

pub mod memory;
pub mod notary;
pub mod rpc;

pub use memory::{LedgerReads, MemoryLedger};
pub use notary::{HttpNotary, LocalNotary, Notary};
pub use rpc::RpcLedger;

use async_trait::async_trait;
use capsule_core::{Capsule, CapsuleId, CapsuleRef, Principal, Service, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger and notary errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Capsule(#[from] capsule_core::Error),

    #[error("ledger rejected request: {0}")]
    Rejected(String),

    #[error("ledger request failed: {0}")]
    Network(String),

    #[error("ledger request timed out")]
    Timeout,

    #[error("ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed ledger response: {0}")]
    Malformed(String),

    #[error("ledger storage error: {0}")]
    Storage(String),

    #[error("notary rejected request: {0}")]
    SignatureRejected(String),

    #[error("notary unreachable: {0}")]
    NotaryNetwork(String),
}

impl From<Error> for capsule_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Capsule(e) => e,
            Error::Rejected(message) | Error::Malformed(message) => capsule_core::Error::Rejected {
                service: Service::Ledger,
                message,
            },
            e @ Error::Rpc { .. } => capsule_core::Error::Rejected {
                service: Service::Ledger,
                message: e.to_string(),
            },
            Error::Network(message) => capsule_core::Error::network(Service::Ledger, message),
            // a failed local write is not a transient outage; resubmitting
            // would not help and could duplicate the record
            Error::Storage(message) => capsule_core::Error::Rejected {
                service: Service::Ledger,
                message: format!("storage: {message}"),
            },
            Error::Timeout => capsule_core::Error::network(Service::Ledger, "timed out"),
            Error::SignatureRejected(reason) => capsule_core::Error::SignatureRejected(reason),
            Error::NotaryNetwork(message) => {
                tracing::warn!(%message, "notary unreachable");
                capsule_core::Error::ServiceUnavailable {
                    service: Service::Notary,
                }
            }
        }
    }
}

/// A capsule submission, before the ledger assigns ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCapsule {
    pub author: String,
    pub author_principal: Principal,
    pub reveal_at: DateTime<Utc>,
    pub visibility: Visibility,
    pub ciphertext: Vec<u8>,
    pub max_supply: u64,
    pub fee: u64,
    /// Notary signature over (principal, author)
    pub signature: Vec<u8>,
}

/// Identifiers assigned on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub id: CapsuleId,
    pub short_id: String,
    pub uuid: Uuid,
    pub sealed_at: DateTime<Utc>,
}

/// Supply after a mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    pub id: CapsuleId,
    pub minted: u64,
    pub remaining: u64,
}

/// Read/write access to the capsule ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Map any alias to the canonical id.
    async fn resolve(&self, reference: &CapsuleRef) -> Result<CapsuleId>;

    /// Capsule record. The ciphertext may be missing while content propagates.
    async fn capsule(&self, id: CapsuleId) -> Result<Capsule>;

    /// Time-lock ciphertext, `None` until it has propagated.
    async fn content(&self, id: CapsuleId) -> Result<Option<Vec<u8>>>;

    /// Access tokens `principal` holds for capsule `id`.
    async fn access_balance(&self, id: CapsuleId, principal: &Principal) -> Result<u64>;

    async fn submit(&self, capsule: NewCapsule) -> Result<SubmitReceipt>;

    /// Derive one token to `to`. Fails with `SupplyExhausted` without writing.
    async fn mint(&self, id: CapsuleId, to: &Principal) -> Result<MintReceipt>;
}
