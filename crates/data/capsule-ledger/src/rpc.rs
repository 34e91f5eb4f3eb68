//! JSON-RPC ledger client
//!
//! Thin client over the ledger node's JSON-RPC 2.0 API. Byte fields travel
//! hex-encoded.
//!
//! | Method                  | Params                 | Result           |
//! |-------------------------|------------------------|------------------|
//! | `capsule_resolve`       | `[ref]` (`#42`, alias) | `u64`            |
//! | `capsule_get`           | `[id]`                 | capsule          |
//! | `capsule_content`       | `[id]`                 | hex or `null`    |
//! | `capsule_accessBalance` | `[id, principal]`      | `u64`            |
//! | `capsule_submit`        | `[submission]`         | receipt          |
//! | `capsule_mint`          | `[id, principal]`      | mint receipt     |

use async_trait::async_trait;
use capsule_core::{Capsule, CapsuleId, CapsuleParts, CapsuleRef, Principal, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::{Error, Ledger, MintReceipt, NewCapsule, Result, SubmitReceipt};

/// Error code the node uses for unknown capsules
const CODE_NOT_FOUND: i64 = -32004;
/// Error code the node uses for exhausted supply
const CODE_SUPPLY_EXHAUSTED: i64 = -32010;

#[derive(Debug, Serialize, Deserialize)]
struct WireCapsule {
    id: u64,
    short_id: String,
    uuid: Uuid,
    author: String,
    author_principal: String,
    sealed_at: DateTime<Utc>,
    reveal_at: DateTime<Utc>,
    visibility: Visibility,
    #[serde(default)]
    ciphertext: Option<String>,
    #[serde(default)]
    minted: u64,
    max_supply: u64,
}

impl TryFrom<WireCapsule> for Capsule {
    type Error = Error;

    fn try_from(wire: WireCapsule) -> Result<Self> {
        let ciphertext = match wire.ciphertext.as_deref() {
            Some(hex_str) => decode_hex(hex_str)?,
            None => Vec::new(),
        };
        let principal = Principal::new(&wire.author_principal)?;
        Ok(Capsule::from_parts(CapsuleParts {
            id: CapsuleId(wire.id),
            short_id: wire.short_id,
            uuid: wire.uuid,
            author: wire.author,
            author_principal: principal,
            sealed_at: wire.sealed_at,
            reveal_at: wire.reveal_at,
            visibility: wire.visibility,
            ciphertext,
            minted: wire.minted,
            max_supply: wire.max_supply,
        })?)
    }
}

#[derive(Debug, Serialize)]
struct WireSubmission<'a> {
    author: &'a str,
    author_principal: &'a str,
    reveal_at: DateTime<Utc>,
    visibility: Visibility,
    ciphertext: String,
    max_supply: u64,
    fee: u64,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct WireReceipt {
    id: u64,
    short_id: String,
    uuid: Uuid,
    sealed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireMint {
    id: u64,
    minted: u64,
    remaining: u64,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(raw).map_err(|e| Error::Malformed(format!("bad hex: {e}")))
}

/// Unwrap a JSON-RPC response envelope.
fn parse_response<R: for<'de> Deserialize<'de>>(json: serde_json::Value) -> Result<R> {
    if let Some(error) = json.get("error") {
        let error: RpcError =
            serde_json::from_value(error.clone()).map_err(|e| Error::Malformed(e.to_string()))?;
        return Err(match error.code {
            CODE_NOT_FOUND => capsule_core::Error::NotFound(error.message).into(),
            CODE_SUPPLY_EXHAUSTED => Error::Rejected(error.message),
            code => Error::Rpc {
                code,
                message: error.message,
            },
        });
    }

    let result = json
        .get("result")
        .ok_or_else(|| Error::Malformed("missing result in RPC response".into()))?;
    serde_json::from_value(result.clone()).map_err(|e| Error::Malformed(e.to_string()))
}

/// Ledger reached over JSON-RPC
pub struct RpcLedger {
    rpc_url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Raw JSON-RPC call
    async fn rpc_call<P: Serialize, R: for<'de> Deserialize<'de>>(&self, method: &str, params: P) -> Result<R> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Network(e.to_string())
                }
            })?;

        if resp.status().is_server_error() {
            return Err(Error::Network(format!("HTTP {}", resp.status())));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| Error::Malformed(e.to_string()))?;
        tracing::trace!(method, "ledger rpc call complete");
        parse_response(json)
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn resolve(&self, reference: &CapsuleRef) -> Result<CapsuleId> {
        let id: u64 = self.rpc_call("capsule_resolve", [reference.to_string()]).await?;
        Ok(CapsuleId(id))
    }

    async fn capsule(&self, id: CapsuleId) -> Result<Capsule> {
        let wire: WireCapsule = self.rpc_call("capsule_get", [id.0]).await?;
        wire.try_into()
    }

    async fn content(&self, id: CapsuleId) -> Result<Option<Vec<u8>>> {
        let raw: Option<String> = self.rpc_call("capsule_content", [id.0]).await?;
        match raw.as_deref() {
            None | Some("") | Some("0x") => Ok(None),
            Some(hex_str) => decode_hex(hex_str).map(Some),
        }
    }

    async fn access_balance(&self, id: CapsuleId, principal: &Principal) -> Result<u64> {
        self.rpc_call("capsule_accessBalance", (id.0, principal.as_str()))
            .await
    }

    async fn submit(&self, capsule: NewCapsule) -> Result<SubmitReceipt> {
        let submission = WireSubmission {
            author: &capsule.author,
            author_principal: capsule.author_principal.as_str(),
            reveal_at: capsule.reveal_at,
            visibility: capsule.visibility,
            ciphertext: hex::encode(&capsule.ciphertext),
            max_supply: capsule.max_supply,
            fee: capsule.fee,
            signature: hex::encode(&capsule.signature),
        };
        let receipt: WireReceipt = self.rpc_call("capsule_submit", [submission]).await?;
        tracing::info!(capsule = receipt.id, "capsule submitted");
        Ok(SubmitReceipt {
            id: CapsuleId(receipt.id),
            short_id: receipt.short_id,
            uuid: receipt.uuid,
            sealed_at: receipt.sealed_at,
        })
    }

    async fn mint(&self, id: CapsuleId, to: &Principal) -> Result<MintReceipt> {
        let wire: WireMint = self.rpc_call("capsule_mint", (id.0, to.as_str())).await?;
        Ok(MintReceipt {
            id: CapsuleId(wire.id),
            minted: wire.minted,
            remaining: wire.remaining,
        })
    }
}
