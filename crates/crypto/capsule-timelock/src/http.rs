//! drand-compatible HTTP beacon
//!
//! Reads chain parameters and round signatures from a drand HTTP relay:
//!
//! ```text
//! GET {endpoint}/{chain_hash}/info            -> chain parameters
//! GET {endpoint}/{chain_hash}/public/{round}  -> round signature
//! ```
//!
//! Features:
//! - Chain info cached for the life of the client
//! - Chain info fetch retried with exponential backoff
//! - Rounds in the future are refused locally, without a request
//! - 404 / 425 from the relay read as "not yet published"

use async_trait::async_trait;
use capsule_core::{Clock, SystemClock};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::{Beacon, ChainInfo, Error, Result, RoundSignature};

/// Default public relay
pub const DEFAULT_ENDPOINT: &str = "https://api.drand.sh";

/// Chain info as served by the relay
#[derive(Debug, Deserialize)]
struct ChainInfoResponse {
    public_key: String,
    period: u64,
    genesis_time: i64,
    hash: String,
    #[serde(rename = "schemeID", default)]
    scheme_id: Option<String>,
    #[serde(default)]
    metadata: Option<ChainMetadata>,
}

#[derive(Debug, Deserialize)]
struct ChainMetadata {
    #[serde(rename = "beaconID")]
    beacon_id: Option<String>,
}

/// Round as served by the relay
#[derive(Debug, Deserialize)]
struct RoundResponse {
    round: u64,
    signature: String,
}

/// Request counters
#[derive(Debug, Clone, Default)]
pub struct BeaconStats {
    pub info_fetches: u64,
    pub info_cache_hits: u64,
    pub round_fetches: u64,
    pub rounds_not_ready: u64,
    pub failed_requests: u64,
}

/// HTTP beacon client
pub struct HttpBeacon {
    endpoint: String,
    chain_hash: Option<String>,
    client: reqwest::Client,
    cache: Arc<RwLock<Option<ChainInfo>>>,
    max_retries: u32,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<BeaconStats>>,
}

impl HttpBeacon {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            chain_hash: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache: Arc::new(RwLock::new(None)),
            max_retries: 3,
            clock: Arc::new(SystemClock),
            stats: Arc::new(RwLock::new(BeaconStats::default())),
        }
    }

    /// Pin the chain; info from the relay must carry this hash.
    pub fn chain_hash(mut self, hash: impl Into<String>) -> Self {
        self.chain_hash = Some(hash.into().to_lowercase());
        self
    }

    /// Per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the chain-info cache, skipping the info request.
    pub fn with_chain_info(self, info: ChainInfo) -> Self {
        Self {
            cache: Arc::new(RwLock::new(Some(info))),
            ..self
        }
    }

    pub async fn stats(&self) -> BeaconStats {
        self.stats.read().await.clone()
    }

    fn url(&self, path: &str) -> String {
        match &self.chain_hash {
            Some(hash) => format!("{}/{}/{}", self.endpoint, hash, path),
            None => format!("{}/{}", self.endpoint, path),
        }
    }

    async fn fetch_info_with_retry(&self) -> Result<ChainInfo> {
        let mut last_error = Error::Network("no attempt made".into());

        for attempt in 0..self.max_retries {
            match self.fetch_info_once().await {
                Ok(info) => return Ok(info),
                // a relay serving the wrong chain will not fix itself
                Err(e @ Error::InvalidChainInfo(_)) => return Err(e),
                Err(e) => {
                    last_error = e;
                    if attempt < self.max_retries - 1 {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }

        self.stats.write().await.failed_requests += 1;
        tracing::warn!(
            "beacon info fetch failed after {} retries: {}",
            self.max_retries,
            last_error
        );
        Err(last_error)
    }

    async fn fetch_info_once(&self) -> Result<ChainInfo> {
        let response = self
            .client
            .get(self.url("info"))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Error::Network(format!("HTTP {}", response.status())));
        }

        let data: ChainInfoResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidChainInfo(e.to_string()))?;
        parse_chain_info(data, self.chain_hash.as_deref())
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::Network(err.to_string())
    }
}

fn parse_chain_info(data: ChainInfoResponse, expected_hash: Option<&str>) -> Result<ChainInfo> {
    let hash = hex::decode(&data.hash).map_err(|e| Error::InvalidChainInfo(format!("hash: {e}")))?;
    let public_key =
        hex::decode(&data.public_key).map_err(|e| Error::InvalidChainInfo(format!("public key: {e}")))?;

    if let Some(expected) = expected_hash {
        if !data.hash.eq_ignore_ascii_case(expected) {
            return Err(Error::InvalidChainInfo(format!(
                "relay serves chain {}, expected {}",
                data.hash, expected
            )));
        }
    }

    let scheme = data.scheme_id.unwrap_or_else(|| "pedersen-bls-chained".to_string());
    let info = ChainInfo::new(hash, public_key, data.genesis_time, data.period, scheme)?;
    Ok(match data.metadata.and_then(|m| m.beacon_id) {
        Some(id) => info.with_beacon_id(id),
        None => info,
    })
}

#[async_trait]
impl Beacon for HttpBeacon {
    async fn chain_info(&self) -> Result<ChainInfo> {
        {
            let cache = self.cache.read().await;
            if let Some(info) = cache.as_ref() {
                self.stats.write().await.info_cache_hits += 1;
                return Ok(info.clone());
            }
        }

        let info = self.fetch_info_with_retry().await?;
        *self.cache.write().await = Some(info.clone());
        self.stats.write().await.info_fetches += 1;
        tracing::info!(
            chain = %info.hash_hex(),
            period = info.period(),
            genesis = info.genesis_time(),
            "beacon chain info loaded"
        );
        Ok(info)
    }

    async fn round_signature(&self, round: u64) -> Result<RoundSignature> {
        let info = self.chain_info().await?;
        if self.clock.now() < info.round_time(round) {
            self.stats.write().await.rounds_not_ready += 1;
            return Err(Error::NotYetUnlocked { round });
        }

        self.stats.write().await.round_fetches += 1;
        let response = self
            .client
            .get(self.url(&format!("public/{round}")))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            // relays answer early requests with 404 or 425 Too Early
            StatusCode::NOT_FOUND | StatusCode::TOO_EARLY => {
                self.stats.write().await.rounds_not_ready += 1;
                return Err(Error::NotYetUnlocked { round });
            }
            status if !status.is_success() => {
                self.stats.write().await.failed_requests += 1;
                return Err(Error::Network(format!("HTTP {status}")));
            }
            _ => {}
        }

        let data: RoundResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("round response: {e}")))?;
        if data.round != round {
            return Err(Error::Corrupt(format!(
                "relay returned round {} for {}",
                data.round, round
            )));
        }
        let signature =
            hex::decode(&data.signature).map_err(|e| Error::Corrupt(format!("round signature: {e}")))?;

        Ok(RoundSignature { round, signature })
    }
}
