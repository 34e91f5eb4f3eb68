//! Builds the collaborators a command needs from configuration.
//!
//! ```text
//!  beacon.mode = http    HttpBeacon(endpoint, hash)    beacon
//!                        DrandScheme(beacon.scheme)    scheme
//!  beacon.mode = local   LocalBeacon(secret file)      beacon + scheme (development)
//!  ledger.endpoint       RpcLedger  | MemoryLedger(ledger.json)
//!  notary.endpoint       HttpNotary | LocalNotary(secret file)
//! ```

use anyhow::{Context, Result};
use capsule_config::{BeaconMode, CapsuleConfig};
use capsule_core::{Clock, SystemClock};
use capsule_ledger::{HttpNotary, Ledger, LocalNotary, MemoryLedger, Notary, RpcLedger};
use capsule_lifecycle::{Sealer, Services};
use capsule_timelock::{Beacon, DrandScheme, HttpBeacon, LocalBeacon, TimelockScheme};
use std::path::Path;
use std::sync::Arc;

pub struct Wiring {
    pub services: Services,
    pub notary: Arc<dyn Notary>,
}

impl Wiring {
    pub fn from_config(config: &CapsuleConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let call_timeout = config.reveal.call_timeout();

        let (beacon, scheme): (Arc<dyn Beacon>, Arc<dyn TimelockScheme>) = match config.beacon.mode {
            BeaconMode::Http => {
                let mut http = HttpBeacon::new(&config.beacon.endpoint)
                    .timeout(call_timeout)
                    .clock(clock.clone());
                if let Some(hash) = &config.beacon.chain_hash {
                    http = http.chain_hash(hash);
                }
                let scheme = DrandScheme::new(&config.beacon.scheme)
                    .with_context(|| format!("beacon.scheme {}", config.beacon.scheme))?;
                let beacon: Arc<dyn Beacon> = Arc::new(http);
                let scheme: Arc<dyn TimelockScheme> = Arc::new(scheme);
                (beacon, scheme)
            }
            BeaconMode::Local => {
                tracing::warn!("local beacon: the holder of its secret can open capsules early");
                let local = Arc::new(load_local_beacon(config, clock.clone())?);
                let beacon: Arc<dyn Beacon> = local.clone();
                let scheme: Arc<dyn TimelockScheme> = local;
                (beacon, scheme)
            }
        };

        let (notary, verifier): (Arc<dyn Notary>, Option<Arc<LocalNotary>>) = match &config.notary.endpoint {
            Some(url) => {
                let notary: Arc<dyn Notary> = Arc::new(HttpNotary::new(url).timeout(call_timeout));
                (notary, None)
            }
            None => {
                let path = config.notary_secret_path();
                let secret = load_or_create_secret(&path, || LocalNotary::generate().secret_hex())?;
                let notary = Arc::new(
                    LocalNotary::from_hex(&secret)
                        .with_context(|| format!("reading notary secret {}", path.display()))?,
                );
                let signer: Arc<dyn Notary> = notary.clone();
                (signer, Some(notary))
            }
        };

        let ledger: Arc<dyn Ledger> = match &config.ledger.endpoint {
            Some(url) => Arc::new(RpcLedger::new(url).timeout(call_timeout)),
            None => {
                let path = config.ledger_path();
                let mut ledger = MemoryLedger::open(&path, clock.clone())
                    .with_context(|| format!("opening ledger {}", path.display()))?;
                if let Some(verifier) = verifier {
                    ledger = ledger.with_verifier(verifier);
                }
                Arc::new(ledger)
            }
        };

        let services = Services::new(ledger, beacon, scheme, clock).with_call_timeout(call_timeout);
        Ok(Self { services, notary })
    }

    pub fn sealer(&self, config: &CapsuleConfig) -> Sealer {
        Sealer::new(self.services.clone(), self.notary.clone())
            .with_limits(config.seal.limits)
            .with_fee(config.seal.fee)
            .with_max_supply(config.seal.max_supply)
    }
}

fn load_local_beacon(config: &CapsuleConfig, clock: Arc<dyn Clock>) -> Result<LocalBeacon> {
    let (genesis, period) = (config.beacon.genesis_time, config.beacon.period_secs);
    let path = config.beacon_secret_path();
    let secret = load_or_create_secret(&path, || {
        LocalBeacon::generate(genesis, period, clock.clone()).secret_hex()
    })?;
    LocalBeacon::from_hex(&secret, genesis, period, clock)
        .with_context(|| format!("reading beacon secret {}", path.display()))
}

/// Hex secret at `path`, generating a fresh one on first use.
fn load_or_create_secret(path: &Path, generate: impl FnOnce() -> String) -> Result<String> {
    if path.exists() {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok(content.trim().to_string());
    }

    let secret = generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, &secret).with_context(|| format!("writing {}", path.display()))?;
    restrict_permissions(path)?;
    tracing::info!(path = %path.display(), "generated new secret");
    Ok(secret)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("restricting {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
