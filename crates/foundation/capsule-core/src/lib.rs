//! # Capsule Core
//!
//! Shared foundation for time capsules: the capsule record, its identifiers,
//! the sealing limits and the error taxonomy every other crate converts into.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           CAPSULE                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  id (u64) ◄── short id (base58) ◄── uuid      all resolve here   │
//! │                                                                  │
//! │  sealed_at ─────────────► reveal_at          reveal_at > sealed  │
//! │                                                                  │
//! │  visibility: PUBLIC | PRIVATE                 fixed forever      │
//! │  ciphertext: time-lock envelope               write-once         │
//! │  minted / max_supply                          only mutable part  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod capsule;
pub mod clock;
pub mod error;
pub mod limits;

pub use capsule::{Capsule, CapsuleId, CapsuleParts, CapsuleRef, Principal, Visibility};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Gate, Service, ValidationError};
pub use limits::SealLimits;

/// Result type for capsule operations
pub type Result<T> = std::result::Result<T, Error>;
