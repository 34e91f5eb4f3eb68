//! Sealing pipeline
//!
//! Input is checked before anything leaves the process. A capsule that fails
//! validation costs nothing: no notary request, no beacon lookup, no ledger
//! write.

use capsule_cipher::{seal_anonymous, seal_password_with, CapsuleKey, PasswordParams};
use capsule_core::limits::DEFAULT_MAX_SUPPLY;
use capsule_core::{CapsuleId, Principal, Result, SealLimits, Service, ValidationError, Visibility};
use capsule_ledger::{NewCapsule, Notary};
use capsule_timelock::timelock_seal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{timed, InnerPayload, Services};

/// How the inner layer protects the message
#[derive(Clone)]
pub enum SealMode {
    /// Anyone may read once the time-lock opens
    Public,
    /// Token holders who also know the password
    Private { password: String },
    /// Whoever holds the key returned in the receipt
    Keyed,
}

impl SealMode {
    pub fn visibility(&self) -> Visibility {
        match self {
            Self::Private { .. } => Visibility::Private,
            Self::Public | Self::Keyed => Visibility::Public,
        }
    }
}

impl std::fmt::Debug for SealMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::Private { .. } => write!(f, "Private {{ password: [REDACTED] }}"),
            Self::Keyed => write!(f, "Keyed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SealRequest {
    pub message: String,
    /// Display name shown to readers
    pub author: String,
    pub principal: Principal,
    pub reveal_at: DateTime<Utc>,
    pub mode: SealMode,
}

#[derive(Debug, Clone)]
pub struct SealReceipt {
    pub id: CapsuleId,
    pub short_id: String,
    pub uuid: Uuid,
    pub sealed_at: DateTime<Utc>,
    /// Beacon round that opens the outer layer
    pub reveal_round: u64,
    /// Present for keyed capsules only; the ledger never sees it
    pub key: Option<CapsuleKey>,
}

/// Turns messages into ledger submissions
pub struct Sealer {
    services: Services,
    notary: Arc<dyn Notary>,
    limits: SealLimits,
    fee: u64,
    max_supply: u64,
    password_params: PasswordParams,
}

impl Sealer {
    pub fn new(services: Services, notary: Arc<dyn Notary>) -> Self {
        Self {
            services,
            notary,
            limits: SealLimits::default(),
            fee: 0,
            max_supply: DEFAULT_MAX_SUPPLY,
            password_params: PasswordParams::default(),
        }
    }

    pub fn with_limits(mut self, limits: SealLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_max_supply(mut self, max_supply: u64) -> Self {
        self.max_supply = max_supply;
        self
    }

    pub fn with_password_params(mut self, params: PasswordParams) -> Self {
        self.password_params = params;
        self
    }

    /// Local checks only.
    pub fn validate(&self, request: &SealRequest) -> Result<()> {
        self.limits.check_message(&request.message)?;
        self.limits
            .check_reveal_at(self.services.clock.now(), request.reveal_at)?;
        if let SealMode::Private { password } = &request.mode {
            if password.is_empty() {
                return Err(ValidationError::MissingPassword.into());
            }
        }
        Ok(())
    }

    pub async fn seal(&self, request: SealRequest) -> Result<SealReceipt> {
        self.validate(&request)?;
        let call_timeout = self.services.call_timeout;

        let signature = timed(
            Service::Notary,
            call_timeout,
            self.notary.sign(&request.principal, &request.author),
        )
        .await?;

        let (inner, key) = self.inner_layer(&request)?;

        let chain = timed(Service::Beacon, call_timeout, self.services.beacon.chain_info()).await?;
        let envelope = timelock_seal(
            &inner.encode(),
            request.reveal_at,
            &chain,
            self.services.scheme.as_ref(),
        )?;
        let reveal_round = envelope.round();

        let receipt = timed(
            Service::Ledger,
            call_timeout,
            self.services.ledger.submit(NewCapsule {
                author: request.author,
                author_principal: request.principal,
                reveal_at: request.reveal_at,
                visibility: request.mode.visibility(),
                ciphertext: envelope.to_bytes(),
                max_supply: self.max_supply,
                fee: self.fee,
                signature,
            }),
        )
        .await?;

        tracing::info!(
            capsule = %receipt.id,
            short_id = %receipt.short_id,
            reveal_at = %request.reveal_at,
            reveal_round,
            mode = ?request.mode,
            "capsule sealed"
        );

        Ok(SealReceipt {
            id: receipt.id,
            short_id: receipt.short_id,
            uuid: receipt.uuid,
            sealed_at: receipt.sealed_at,
            reveal_round,
            key,
        })
    }

    fn inner_layer(&self, request: &SealRequest) -> Result<(InnerPayload, Option<CapsuleKey>)> {
        let message = request.message.as_bytes();
        Ok(match &request.mode {
            SealMode::Public => (InnerPayload::Plain(request.message.clone()), None),
            SealMode::Private { password } => {
                let sealed = seal_password_with(self.password_params, message, password)?;
                (InnerPayload::Password(sealed), None)
            }
            SealMode::Keyed => {
                let (sealed, key) = seal_anonymous(message)?;
                (InnerPayload::Keyed(sealed), Some(key))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alice, Fixture, RefusingNotary};
    use capsule_core::{CapsuleRef, Error};
    use capsule_ledger::Ledger;

    #[tokio::test(start_paused = true)]
    async fn test_validation_happens_before_network() {
        let fx = Fixture::new();
        let sealer = fx.sealer();

        let err = sealer
            .seal(fx.request("too soon", 30, SealMode::Public))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::RevealTooSoon { .. })));

        let long = "x".repeat(7778);
        let err = sealer
            .seal(fx.request(&long, 600, SealMode::Public))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MessageTooLong { chars: 7778, max: 7777 })
        ));

        let err = sealer
            .seal(fx.request("", 600, SealMode::Public))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyMessage)));

        let err = sealer
            .seal(fx.request("hi", 600, SealMode::Private { password: String::new() }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingPassword)));

        assert_eq!(fx.beacon.calls(), 0);
        assert_eq!(fx.ledger.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_lengths_and_lead() {
        let fx = Fixture::new();
        let sealer = fx.sealer();

        let exact = "x".repeat(7777);
        assert!(sealer.seal(fx.request(&exact, 60, SealMode::Public)).await.is_ok());
        assert_eq!(fx.ledger.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sealed_record() {
        let fx = Fixture::new();
        let receipt = fx
            .sealer()
            .seal(fx.request("hello future", 90, SealMode::Public))
            .await
            .unwrap();

        let capsule = fx.ledger.capsule(receipt.id).await.unwrap();
        assert_eq!(capsule.author(), "Alice");
        assert_eq!(capsule.short_id(), receipt.short_id);
        assert_eq!(capsule.short_id(), CapsuleRef::short_for(&receipt.uuid));
        assert_eq!(capsule.visibility(), Visibility::Public);
        assert_eq!(capsule.minted(), 0);
        assert_eq!(capsule.max_supply(), DEFAULT_MAX_SUPPLY);
        assert!(receipt.key.is_none());

        // plaintext never reaches the ledger
        let stored = capsule.ciphertext().unwrap();
        assert!(!stored.windows(12).any(|w| w == b"hello future"));

        let chain = fx.local.chain();
        assert_eq!(receipt.reveal_round, chain.target_round(capsule.reveal_at()));
        assert!(chain.round_time(receipt.reveal_round) >= capsule.reveal_at());
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_marks_visibility() {
        let fx = Fixture::new();
        let receipt = fx
            .sealer()
            .with_max_supply(3)
            .seal(fx.request("secret", 120, SealMode::Private { password: "pw".into() }))
            .await
            .unwrap();

        let capsule = fx.ledger.capsule(receipt.id).await.unwrap();
        assert!(capsule.visibility().is_private());
        assert_eq!(capsule.max_supply(), 3);
        assert_eq!(fx.ledger.access_balance(receipt.id, &alice()).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notary_refusal_writes_nothing() {
        let fx = Fixture::new();
        let sealer = Sealer::new(fx.services(), Arc::new(RefusingNotary));

        let err = sealer
            .seal(fx.request("unsigned", 120, SealMode::Public))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignatureRejected(_)));
        assert_eq!(fx.ledger.len().await, 0);
    }

    #[test]
    fn test_mode_debug_redacts() {
        let mode = SealMode::Private {
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", mode).contains("hunter2"));
        assert_eq!(mode.visibility(), Visibility::Private);
        assert_eq!(SealMode::Keyed.visibility(), Visibility::Public);
    }
}
