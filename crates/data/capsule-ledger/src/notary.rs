//! Notary capability
//!
//! A notary attests that a principal may publish under a display name. The
//! signature travels with the submission; the ledger decides what to do
//! with it.

use async_trait::async_trait;
use capsule_core::Principal;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Issues publication signatures
#[async_trait]
pub trait Notary: Send + Sync {
    async fn sign(&self, principal: &Principal, display_name: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    address: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

/// Remote signing endpoint
pub struct HttpNotary {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpNotary {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }
}

#[async_trait]
impl Notary for HttpNotary {
    async fn sign(&self, principal: &Principal, display_name: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SignRequest {
                address: principal.as_str(),
                name: display_name,
            })
            .send()
            .await
            .map_err(|e| Error::NotaryNetwork(e.to_string()))?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), %principal, "notary refused to sign");
            return Err(Error::SignatureRejected("verification failed".into()));
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| Error::SignatureRejected(format!("unreadable notary response: {e}")))?;
        decode_signature(&body.signature)
    }
}

fn decode_signature(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim();
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    let signature =
        hex::decode(hex_part).map_err(|e| Error::SignatureRejected(format!("signature is not hex: {e}")))?;
    if signature.is_empty() {
        return Err(Error::SignatureRejected("empty signature".into()));
    }
    Ok(signature)
}

/// In-process notary keyed by a local secret
pub struct LocalNotary {
    secret: Zeroizing<[u8; 32]>,
}

impl LocalNotary {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            secret: Zeroizing::new(secret),
        }
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim()).map_err(|e| Error::Storage(format!("notary secret: {e}")))?,
        );
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Storage("notary secret must be 32 bytes".into()))?;
        Ok(Self::from_secret(secret))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(&self.secret[..])
    }

    fn mac(&self, principal: &Principal, display_name: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret[..])
            .expect("HMAC can take key of any size");
        mac.update(principal.as_str().as_bytes());
        mac.update(&[0]);
        mac.update(display_name.as_bytes());
        mac
    }

    /// Constant-time check of a signature this notary issued.
    pub fn verify(&self, principal: &Principal, display_name: &str, signature: &[u8]) -> bool {
        self.mac(principal, display_name).verify_slice(signature).is_ok()
    }
}

#[async_trait]
impl Notary for LocalNotary {
    async fn sign(&self, principal: &Principal, display_name: &str) -> Result<Vec<u8>> {
        Ok(self.mac(principal, display_name).finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Principal {
        Principal::new("0xA11CE").unwrap()
    }

    #[tokio::test]
    async fn test_local_sign_and_verify() {
        let notary = LocalNotary::generate();
        let sig = notary.sign(&alice(), "Alice").await.unwrap();

        assert!(notary.verify(&alice(), "Alice", &sig));
        assert!(!notary.verify(&alice(), "Mallory", &sig));
        assert!(!LocalNotary::generate().verify(&alice(), "Alice", &sig));
    }

    #[tokio::test]
    async fn test_name_boundary_is_unambiguous() {
        let notary = LocalNotary::from_secret([4u8; 32]);
        let a = notary.sign(&Principal::new("ab").unwrap(), "c").await.unwrap();
        let b = notary.sign(&Principal::new("a").unwrap(), "bc").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_persistence() {
        let notary = LocalNotary::generate();
        let restored = LocalNotary::from_hex(&notary.secret_hex()).unwrap();
        assert_eq!(notary.secret_hex(), restored.secret_hex());
        assert!(LocalNotary::from_hex("00ff").is_err());
    }

    #[test]
    fn test_decode_signature() {
        assert_eq!(decode_signature("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(decode_signature("ff").unwrap(), vec![0xff]);
        assert!(matches!(decode_signature(""), Err(Error::SignatureRejected(_))));
        assert!(matches!(decode_signature("xyz"), Err(Error::SignatureRejected(_))));
    }

    #[tokio::test]
    async fn test_unreachable_http_notary() {
        let notary = HttpNotary::new("http://127.0.0.1:9/sign").timeout(Duration::from_millis(200));
        let err = notary.sign(&alice(), "Alice").await.unwrap_err();
        assert!(matches!(err, Error::NotaryNetwork(_)));
    }
}
