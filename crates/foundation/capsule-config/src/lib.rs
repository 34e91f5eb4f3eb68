//! # Capsule Config
//!
//! Layered configuration for the capsule tools.
//!
//! ```text
//!  defaults ──► ~/.config/capsule/config.yaml ──► CAPSULE_* env ──► validate
//! ```
//!
//! | Variable              | Overrides                             |
//! |-----------------------|---------------------------------------|
//! | `CAPSULE_BEACON_MODE` | `beacon.mode` (`http` or `local`)     |
//! | `CAPSULE_BEACON_URL`  | `beacon.endpoint` (switches to http)  |
//! | `CAPSULE_CHAIN_HASH`  | `beacon.chain_hash`                   |
//! | `CAPSULE_LEDGER_URL`  | `ledger.endpoint`                     |
//! | `CAPSULE_LEDGER_PATH` | `ledger.path`                         |
//! | `CAPSULE_NOTARY_URL`  | `notary.endpoint`                     |
//! | `CAPSULE_POLL_SECS`   | `reveal.poll_interval_secs`           |

use capsule_core::limits::DEFAULT_MAX_SUPPLY;
use capsule_core::SealLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// drand quicknet, the default beacon chain
pub const QUICKNET_CHAIN_HASH: &str = "52db9ba70e0cc0f6eaf7803dd07447a1f5477735fd3f661792ba94600c84e971";

/// Result type for configuration
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How round signatures are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconMode {
    /// Single-operator beacon with a secret on disk; development only, the
    /// secret holder can open capsules early
    Local,
    /// drand-compatible HTTP relay
    #[default]
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub mode: BeaconMode,
    pub endpoint: String,
    pub chain_hash: Option<String>,
    /// Http mode only; must match the chain's advertised scheme
    pub scheme: String,
    /// Local mode only
    pub genesis_time: i64,
    /// Local mode only
    pub period_secs: u64,
    /// Local mode only; defaults under the data directory
    pub secret_path: Option<PathBuf>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            mode: BeaconMode::Http,
            endpoint: "https://api.drand.sh".to_string(),
            chain_hash: Some(QUICKNET_CHAIN_HASH.to_string()),
            scheme: "bls-unchained-g1-rfc9380".to_string(),
            genesis_time: 1_700_000_000,
            period_secs: 3,
            secret_path: None,
        }
    }
}

/// Ledger location: a JSON-RPC endpoint, or a local snapshot file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub endpoint: Option<String>,
    pub path: Option<PathBuf>,
}

/// Notary: an HTTP signer, or a local HMAC key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotaryConfig {
    pub endpoint: Option<String>,
    pub secret_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    pub poll_interval_secs: u64,
    pub supply_interval_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            supply_interval_secs: 15,
            call_timeout_secs: 10,
        }
    }
}

impl RevealConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn supply_interval(&self) -> Duration {
        Duration::from_secs(self.supply_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    pub limits: SealLimits,
    /// Fee attached to each ledger submission
    pub fee: u64,
    pub max_supply: u64,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            limits: SealLimits::default(),
            fee: 0,
            max_supply: DEFAULT_MAX_SUPPLY,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsuleConfig {
    pub beacon: BeaconConfig,
    pub ledger: LedgerConfig,
    pub notary: NotaryConfig,
    pub reveal: RevealConfig,
    pub seal: SealConfig,
}

impl CapsuleConfig {
    /// `$CONFIG_DIR/capsule/config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capsule")
            .join("config.yaml")
    }

    /// `$DATA_DIR/capsule`, home of the ledger snapshot and local secrets
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capsule")
    }

    /// Default file, then process environment, then validation.
    pub fn load() -> Result<Self> {
        Self::load_layered(&Self::default_path(), |key| std::env::var(key).ok())
    }

    /// Same layering with an explicit file and variable lookup.
    pub fn load_layered(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one YAML file. Missing sections take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_yaml()?).map_err(io_err)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `CAPSULE_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = lookup("CAPSULE_BEACON_MODE") {
            self.beacon.mode = match mode.trim().to_ascii_lowercase().as_str() {
                "http" => BeaconMode::Http,
                "local" => BeaconMode::Local,
                _ => {
                    return Err(Error::Invalid(format!(
                        "CAPSULE_BEACON_MODE={mode} is not http or local"
                    )))
                }
            };
        }
        if let Some(url) = lookup("CAPSULE_BEACON_URL") {
            self.beacon.endpoint = url;
            self.beacon.mode = BeaconMode::Http;
        }
        if let Some(hash) = lookup("CAPSULE_CHAIN_HASH") {
            self.beacon.chain_hash = Some(hash);
        }
        if let Some(url) = lookup("CAPSULE_LEDGER_URL") {
            self.ledger.endpoint = Some(url);
        }
        if let Some(path) = lookup("CAPSULE_LEDGER_PATH") {
            self.ledger.path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("CAPSULE_NOTARY_URL") {
            self.notary.endpoint = Some(url);
        }
        if let Some(secs) = lookup("CAPSULE_POLL_SECS") {
            self.reveal.poll_interval_secs = secs
                .trim()
                .parse()
                .map_err(|_| Error::Invalid(format!("CAPSULE_POLL_SECS={secs} is not a number")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.reveal.poll_interval_secs == 0 {
            return Err(Error::Invalid("reveal.poll_interval_secs must be positive".into()));
        }
        if self.reveal.supply_interval_secs == 0 {
            return Err(Error::Invalid("reveal.supply_interval_secs must be positive".into()));
        }
        if self.reveal.call_timeout_secs == 0 {
            return Err(Error::Invalid("reveal.call_timeout_secs must be positive".into()));
        }
        match self.beacon.mode {
            BeaconMode::Http => {
                if self.beacon.endpoint.trim().is_empty() {
                    return Err(Error::Invalid("beacon.endpoint is required in http mode".into()));
                }
                if self.beacon.chain_hash.as_deref().map_or(true, |h| h.trim().is_empty()) {
                    return Err(Error::Invalid("beacon.chain_hash is required in http mode".into()));
                }
            }
            BeaconMode::Local => {
                if self.beacon.period_secs == 0 {
                    return Err(Error::Invalid("beacon.period_secs must be positive".into()));
                }
            }
        }
        if self.seal.limits.max_message_chars == 0 {
            return Err(Error::Invalid("seal.limits.max_message_chars must be positive".into()));
        }
        if self.seal.limits.min_lead_secs < 0 {
            return Err(Error::Invalid("seal.limits.min_lead_secs cannot be negative".into()));
        }
        if self.seal.max_supply == 0 {
            return Err(Error::Invalid("seal.max_supply must be positive".into()));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("ledger.json"))
    }

    pub fn beacon_secret_path(&self) -> PathBuf {
        self.beacon
            .secret_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("beacon.key"))
    }

    pub fn notary_secret_path(&self) -> PathBuf {
        self.notary
            .secret_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("notary.key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CapsuleConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reveal.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.reveal.supply_interval(), Duration::from_secs(15));
        assert_eq!(config.seal.limits.max_message_chars, 7777);
        assert_eq!(config.beacon.mode, BeaconMode::Http);
        assert_eq!(config.beacon.chain_hash.as_deref(), Some(QUICKNET_CHAIN_HASH));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CapsuleConfig::load_layered(&dir.path().join("absent.yaml"), env(&[])).unwrap();
        assert_eq!(config, CapsuleConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "reveal:\n  poll_interval_secs: 5\nseal:\n  fee: 42\n").unwrap();

        let config = CapsuleConfig::load_layered(&path, env(&[])).unwrap();
        assert_eq!(config.reveal.poll_interval_secs, 5);
        assert_eq!(config.reveal.supply_interval_secs, 15);
        assert_eq!(config.seal.fee, 42);
        assert_eq!(config.seal.max_supply, DEFAULT_MAX_SUPPLY);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "reveal:\n  poll_interval_secs: 5\n").unwrap();

        let config = CapsuleConfig::load_layered(
            &path,
            env(&[
                ("CAPSULE_POLL_SECS", "2"),
                ("CAPSULE_BEACON_URL", "https://relay.example"),
                ("CAPSULE_CHAIN_HASH", "52db9ba7"),
                ("CAPSULE_LEDGER_PATH", "/tmp/ledger.json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.reveal.poll_interval_secs, 2);
        assert_eq!(config.beacon.mode, BeaconMode::Http);
        assert_eq!(config.beacon.endpoint, "https://relay.example");
        assert_eq!(config.ledger_path(), PathBuf::from("/tmp/ledger.json"));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.yaml");
        let err = CapsuleConfig::load_layered(&path, env(&[("CAPSULE_POLL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let err = CapsuleConfig::load_layered(&path, env(&[("CAPSULE_POLL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_local_mode_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.yaml");
        let config = CapsuleConfig::load_layered(&path, env(&[("CAPSULE_BEACON_MODE", "Local")])).unwrap();
        assert_eq!(config.beacon.mode, BeaconMode::Local);

        let err = CapsuleConfig::load_layered(&path, env(&[("CAPSULE_BEACON_MODE", "drand")])).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_http_mode_requires_chain_hash() {
        let mut config = CapsuleConfig::default();
        config.beacon.chain_hash = None;
        assert!(config.validate().is_err());

        config.beacon.chain_hash = Some("  ".into());
        assert!(config.validate().is_err());

        config.beacon.chain_hash = Some("52db9ba7".into());
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = CapsuleConfig::default();
        config.notary.endpoint = Some("https://notary.example/sign".into());
        config.save_to(&path).unwrap();

        assert_eq!(CapsuleConfig::load_from(&path).unwrap(), config);
    }
}
