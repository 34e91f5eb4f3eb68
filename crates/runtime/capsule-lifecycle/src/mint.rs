//! Access token minting

use capsule_core::{CapsuleRef, Error, Principal, Result, Service};
use capsule_ledger::MintReceipt;

use crate::{timed, Services};

/// Mint one access token for `recipient`.
///
/// Supply is checked against the current record first; an exhausted capsule
/// fails with [`Error::SupplyExhausted`] and the ledger sees no write. Every
/// ledger call is bounded by the services' call timeout.
pub async fn mint(services: &Services, reference: &CapsuleRef, recipient: &Principal) -> Result<MintReceipt> {
    let ledger = services.ledger.as_ref();
    let call_timeout = services.call_timeout;

    let id = timed(Service::Ledger, call_timeout, ledger.resolve(reference)).await?;
    let capsule = timed(Service::Ledger, call_timeout, ledger.capsule(id)).await?;
    if capsule.remaining_supply() == 0 {
        tracing::warn!(capsule = %id, minted = capsule.minted(), "mint refused, supply exhausted");
        return Err(Error::SupplyExhausted {
            minted: capsule.minted(),
            max_supply: capsule.max_supply(),
        });
    }

    let receipt = timed(Service::Ledger, call_timeout, ledger.mint(id, recipient)).await?;
    tracing::info!(
        capsule = %id,
        %recipient,
        minted = receipt.minted,
        remaining = receipt.remaining,
        "access token minted"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alice, bob, Fixture, StalledLedger};
    use crate::SealMode;
    use capsule_core::CapsuleId;
    use capsule_ledger::Ledger;
    use std::sync::Arc;
    use std::time::Duration;

    fn seq(id: CapsuleId) -> CapsuleRef {
        CapsuleRef::Seq(id.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mint_until_exhausted() {
        let fx = Fixture::new();
        let receipt = fx
            .sealer()
            .with_max_supply(2)
            .seal(fx.request("limited", 120, SealMode::Public))
            .await
            .unwrap();

        let first = mint(&fx.services(), &seq(receipt.id), &bob()).await.unwrap();
        assert_eq!((first.minted, first.remaining), (1, 1));
        let second = mint(&fx.services(), &seq(receipt.id), &alice()).await.unwrap();
        assert_eq!((second.minted, second.remaining), (2, 0));

        let err = mint(&fx.services(), &seq(receipt.id), &bob()).await.unwrap_err();
        assert!(matches!(err, Error::SupplyExhausted { minted: 2, max_supply: 2 }));

        let capsule = fx.ledger.capsule(receipt.id).await.unwrap();
        assert_eq!(capsule.minted(), 2);
        assert_eq!(fx.ledger.access_balance(receipt.id, &bob()).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mint_unknown_capsule() {
        let fx = Fixture::new();
        let err = mint(&fx.services(), &CapsuleRef::Seq(99), &bob()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_ledger_times_out() {
        let fx = Fixture::new();
        let receipt = fx.seal("slow node", SealMode::Public, 120).await;

        let mut services = fx.services().with_call_timeout(Duration::from_secs(2));
        services.ledger = Arc::new(StalledLedger::new(fx.ledger.clone(), Duration::from_secs(30)));

        let err = mint(&services, &seq(receipt.id), &bob()).await.unwrap_err();
        assert!(matches!(err, Error::Network { service: Service::Ledger, .. }));
        assert!(err.is_retryable());
        assert_eq!(fx.ledger.capsule(receipt.id).await.unwrap().minted(), 0);
    }
}
