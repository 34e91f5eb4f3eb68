//! Access gate
//!
//! Public capsules are open to everyone. Private capsules need a connected
//! identity holding at least one access token; the password is a separate
//! gate checked later by the inner layer.

use capsule_core::{Capsule, Error, Principal, Result};
use capsule_ledger::Ledger;

use crate::AccessState;

/// Decide access for `principal`, asking the ledger only when it matters.
pub async fn evaluate(ledger: &dyn Ledger, capsule: &Capsule, principal: Option<&Principal>) -> Result<AccessState> {
    if !capsule.visibility().is_private() {
        return Ok(AccessState::Granted);
    }
    let Some(principal) = principal else {
        return Ok(AccessState::Unknown);
    };

    let balance = ledger.access_balance(capsule.id(), principal).await?;
    let state = if balance >= 1 {
        AccessState::Granted
    } else {
        AccessState::Denied
    };
    tracing::debug!(capsule = %capsule.id(), %principal, balance, ?state, "access evaluated");
    Ok(state)
}

impl AccessState {
    /// Turn a non-granted state into the error the reader sees.
    pub fn require(self, capsule: capsule_core::CapsuleId) -> Result<()> {
        match self {
            Self::Granted => Ok(()),
            Self::Unknown => Err(Error::IdentityRequired),
            Self::Denied => Err(Error::AccessDenied { capsule: capsule.0 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::{CapsuleId, Gate, ManualClock, Visibility};
    use capsule_ledger::{MemoryLedger, NewCapsule};
    use chrono::{DateTime, Duration};
    use std::sync::Arc;

    async fn ledger_with(visibility: Visibility) -> (MemoryLedger, Capsule) {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ledger = MemoryLedger::new(Arc::new(ManualClock::new(start)));
        let receipt = ledger
            .submit(NewCapsule {
                author: "Alice".into(),
                author_principal: Principal::new("0xa11ce").unwrap(),
                reveal_at: start + Duration::seconds(120),
                visibility,
                ciphertext: vec![1],
                max_supply: 5,
                fee: 0,
                signature: vec![1],
            })
            .await
            .unwrap();
        let capsule = ledger.capsule(receipt.id).await.unwrap();
        (ledger, capsule)
    }

    #[tokio::test]
    async fn test_public_needs_no_identity() {
        let (ledger, capsule) = ledger_with(Visibility::Public).await;
        assert_eq!(evaluate(&ledger, &capsule, None).await.unwrap(), AccessState::Granted);
        assert_eq!(ledger.reads().access_balance, 0);
    }

    #[tokio::test]
    async fn test_private_gate() {
        let (ledger, capsule) = ledger_with(Visibility::Private).await;
        let bob = Principal::new("0xb0b").unwrap();

        assert_eq!(evaluate(&ledger, &capsule, None).await.unwrap(), AccessState::Unknown);
        assert_eq!(
            evaluate(&ledger, &capsule, Some(&bob)).await.unwrap(),
            AccessState::Denied
        );

        ledger.mint(capsule.id(), &bob).await.unwrap();
        assert_eq!(
            evaluate(&ledger, &capsule, Some(&bob)).await.unwrap(),
            AccessState::Granted
        );

        let author = capsule.author_principal().clone();
        assert_eq!(
            evaluate(&ledger, &capsule, Some(&author)).await.unwrap(),
            AccessState::Granted
        );
    }

    #[test]
    fn test_require() {
        let id = CapsuleId(4);
        assert!(AccessState::Granted.require(id).is_ok());
        assert!(matches!(AccessState::Unknown.require(id), Err(Error::IdentityRequired)));

        let err = AccessState::Denied.require(id).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { capsule: 4 }));
        assert_eq!(err.gate(), Some(Gate::Access));
    }
}
