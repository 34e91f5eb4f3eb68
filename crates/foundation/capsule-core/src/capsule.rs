//! The capsule record and its identifiers

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result, ValidationError};

/// Canonical numeric capsule id, assigned by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapsuleId(pub u64);

impl fmt::Display for CapsuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Any textual way of naming a capsule.
///
/// All three forms resolve to the same [`CapsuleId`] through the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapsuleRef {
    /// Sequential numeric id
    Seq(u64),
    /// Short base58 alias
    Short(String),
    /// UUID alias
    Uuid(Uuid),
}

impl CapsuleRef {
    /// Derive the short alias for a capsule uuid (base58 of its first 6 bytes).
    pub fn short_for(uuid: &Uuid) -> String {
        bs58::encode(&uuid.as_bytes()[..6]).into_string()
    }
}

impl From<CapsuleId> for CapsuleRef {
    fn from(id: CapsuleId) -> Self {
        Self::Seq(id.0)
    }
}

/// Shortest all-digit string read as a short alias rather than an id
const MIN_DIGIT_ALIAS_LEN: usize = 8;

impl FromStr for CapsuleRef {
    type Err = Error;

    /// `#42` is always a sequential id. Bare digits are a sequential id
    /// unless they are long enough to be a short alias (digits 1-9 are
    /// base58 too).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::from(ValidationError::InvalidReference(s.to_string()));
        if let Some(seq) = s.strip_prefix('#') {
            return seq.parse::<u64>().map(Self::Seq).map_err(|_| invalid());
        }
        if s.is_empty() {
            return Err(invalid());
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            let alias = s.len() >= MIN_DIGIT_ALIAS_LEN && !s.contains('0');
            if !alias {
                return s.parse::<u64>().map(Self::Seq).map_err(|_| invalid());
            }
        }
        if let Ok(uuid) = Uuid::parse_str(s) {
            return Ok(Self::Uuid(uuid));
        }
        if s.len() <= 12 && bs58::decode(s).into_vec().is_ok() {
            return Ok(Self::Short(s.to_string()));
        }
        Err(invalid())
    }
}

impl fmt::Display for CapsuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seq(n) => write!(f, "#{}", n),
            Self::Short(s) => write!(f, "{}", s),
            Self::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// Canonical identity of a party (wallet address or similar).
///
/// Hex addresses are lowercased so that checksummed and plain forms compare
/// equal. The display name shown to users is kept separately on the capsule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(ValidationError::EmptyPrincipal.into());
        }
        if raw.starts_with("0x") || raw.starts_with("0X") {
            Ok(Self(raw.to_ascii_lowercase()))
        } else {
            Ok(Self(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Principal {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(p: Principal) -> Self {
        p.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who may decrypt a capsule once it is revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone, automatically
    Public,
    /// Access-token holders who also know the password
    Private,
}

impl Visibility {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Plain field bag used to build (and serialize) a [`Capsule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleParts {
    pub id: CapsuleId,
    pub short_id: String,
    pub uuid: Uuid,
    pub author: String,
    pub author_principal: Principal,
    pub sealed_at: DateTime<Utc>,
    pub reveal_at: DateTime<Utc>,
    pub visibility: Visibility,
    #[serde(default)]
    pub ciphertext: Vec<u8>,
    #[serde(default)]
    pub minted: u64,
    pub max_supply: u64,
}

/// A sealed capsule as recorded by the ledger.
///
/// Fields are read-only after construction. The ciphertext may be empty when
/// the record is a view taken before the content propagated; it is never
/// replaced once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CapsuleParts", into = "CapsuleParts")]
pub struct Capsule {
    parts: CapsuleParts,
}

impl Capsule {
    /// Build a capsule, enforcing `reveal_at > sealed_at` and the supply bound.
    pub fn from_parts(parts: CapsuleParts) -> Result<Self> {
        if parts.reveal_at <= parts.sealed_at {
            return Err(ValidationError::RevealNotAfterSeal {
                sealed_at: parts.sealed_at,
                reveal_at: parts.reveal_at,
            }
            .into());
        }
        if parts.minted > parts.max_supply {
            return Err(Error::SupplyExhausted {
                minted: parts.minted,
                max_supply: parts.max_supply,
            });
        }
        Ok(Self { parts })
    }

    pub fn id(&self) -> CapsuleId {
        self.parts.id
    }

    pub fn short_id(&self) -> &str {
        &self.parts.short_id
    }

    pub fn uuid(&self) -> Uuid {
        self.parts.uuid
    }

    pub fn author(&self) -> &str {
        &self.parts.author
    }

    pub fn author_principal(&self) -> &Principal {
        &self.parts.author_principal
    }

    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.parts.sealed_at
    }

    pub fn reveal_at(&self) -> DateTime<Utc> {
        self.parts.reveal_at
    }

    pub fn visibility(&self) -> Visibility {
        self.parts.visibility
    }

    /// Time-lock ciphertext, `None` while the content has not propagated.
    pub fn ciphertext(&self) -> Option<&[u8]> {
        if self.parts.ciphertext.is_empty() {
            None
        } else {
            Some(&self.parts.ciphertext)
        }
    }

    pub fn minted(&self) -> u64 {
        self.parts.minted
    }

    pub fn max_supply(&self) -> u64 {
        self.parts.max_supply
    }

    pub fn remaining_supply(&self) -> u64 {
        self.parts.max_supply.saturating_sub(self.parts.minted)
    }

    /// Whether the wall clock has crossed the reveal boundary.
    pub fn is_revealed_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.parts.reveal_at
    }

    /// Time left until reveal, `None` once revealed.
    pub fn time_until_reveal(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_revealed_at(now) {
            None
        } else {
            Some(self.parts.reveal_at - now)
        }
    }

    /// Record one derivation. Fails without changing anything when the
    /// supply is exhausted.
    pub fn record_mint(&mut self) -> Result<u64> {
        if self.parts.minted >= self.parts.max_supply {
            return Err(Error::SupplyExhausted {
                minted: self.parts.minted,
                max_supply: self.parts.max_supply,
            });
        }
        self.parts.minted += 1;
        Ok(self.parts.minted)
    }

    /// Copy of this record as seen before its content propagated.
    pub fn without_content(&self) -> Self {
        let mut parts = self.parts.clone();
        parts.ciphertext = Vec::new();
        Self { parts }
    }
}

impl TryFrom<CapsuleParts> for Capsule {
    type Error = Error;

    fn try_from(parts: CapsuleParts) -> Result<Self> {
        Self::from_parts(parts)
    }
}

impl From<Capsule> for CapsuleParts {
    fn from(capsule: Capsule) -> Self {
        capsule.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(sealed: i64, reveal: i64) -> CapsuleParts {
        let uuid = Uuid::new_v4();
        CapsuleParts {
            id: CapsuleId(1),
            short_id: CapsuleRef::short_for(&uuid),
            uuid,
            author: "alice.eth".into(),
            author_principal: Principal::new("0xABCDEF").unwrap(),
            sealed_at: DateTime::from_timestamp(sealed, 0).unwrap(),
            reveal_at: DateTime::from_timestamp(reveal, 0).unwrap(),
            visibility: Visibility::Public,
            ciphertext: vec![1, 2, 3],
            minted: 0,
            max_supply: 2,
        }
    }

    #[test]
    fn test_reveal_must_follow_seal() {
        assert!(Capsule::from_parts(parts(1_000, 1_001)).is_ok());

        let err = Capsule::from_parts(parts(1_000, 1_000)).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::RevealNotAfterSeal { .. })
        ));
        assert!(Capsule::from_parts(parts(1_000, 999)).is_err());
    }

    #[test]
    fn test_deserialize_enforces_invariant() {
        let json = serde_json::to_string(&parts(1_000, 900)).unwrap();
        assert!(serde_json::from_str::<Capsule>(&json).is_err());

        let json = serde_json::to_string(&parts(1_000, 2_000)).unwrap();
        let capsule: Capsule = serde_json::from_str(&json).unwrap();
        assert_eq!(capsule.ciphertext(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_mint_respects_supply() {
        let mut capsule = Capsule::from_parts(parts(1_000, 2_000)).unwrap();
        assert_eq!(capsule.record_mint().unwrap(), 1);
        assert_eq!(capsule.record_mint().unwrap(), 2);
        assert!(matches!(
            capsule.record_mint(),
            Err(Error::SupplyExhausted { minted: 2, max_supply: 2 })
        ));
        assert_eq!(capsule.minted(), 2);
        assert_eq!(capsule.remaining_supply(), 0);
    }

    #[test]
    fn test_without_content_hides_ciphertext() {
        let capsule = Capsule::from_parts(parts(1_000, 2_000)).unwrap();
        let view = capsule.without_content();
        assert!(view.ciphertext().is_none());
        assert_eq!(view.id(), capsule.id());
    }

    #[test]
    fn test_reference_parsing() {
        assert_eq!("42".parse::<CapsuleRef>().unwrap(), CapsuleRef::Seq(42));
        assert_eq!("#42".parse::<CapsuleRef>().unwrap(), CapsuleRef::Seq(42));

        let uuid = Uuid::new_v4();
        assert_eq!(
            uuid.to_string().parse::<CapsuleRef>().unwrap(),
            CapsuleRef::Uuid(uuid)
        );

        let short = CapsuleRef::short_for(&uuid);
        assert_eq!(short.parse::<CapsuleRef>().unwrap(), CapsuleRef::Short(short));

        // '0' and 'l' are outside the base58 alphabet
        assert!("0lol".parse::<CapsuleRef>().is_err());
        assert!("".parse::<CapsuleRef>().is_err());
    }

    #[test]
    fn test_digit_only_short_alias() {
        assert_eq!(
            "12345678".parse::<CapsuleRef>().unwrap(),
            CapsuleRef::Short("12345678".into())
        );
        assert_eq!("#12345678".parse::<CapsuleRef>().unwrap(), CapsuleRef::Seq(12_345_678));
        assert_eq!("10000000".parse::<CapsuleRef>().unwrap(), CapsuleRef::Seq(10_000_000));
        assert_eq!("1234567".parse::<CapsuleRef>().unwrap(), CapsuleRef::Seq(1_234_567));
        assert!("#".parse::<CapsuleRef>().is_err());
        assert!("#abc".parse::<CapsuleRef>().is_err());

        for reference in [CapsuleRef::Seq(12_345_678), CapsuleRef::Short("12345678".into())] {
            assert_eq!(reference.to_string().parse::<CapsuleRef>().unwrap(), reference);
        }
    }

    #[test]
    fn test_principal_normalization() {
        let a = Principal::new("0xAbC").unwrap();
        let b = Principal::new(" 0xabc ").unwrap();
        assert_eq!(a, b);
        assert_eq!(Principal::new("fid:123").unwrap().as_str(), "fid:123");
        assert!(Principal::new("   ").is_err());
    }

    #[test]
    fn test_time_until_reveal() {
        let capsule = Capsule::from_parts(parts(1_000, 2_000)).unwrap();
        let before = DateTime::from_timestamp(1_500, 0).unwrap();
        let after = DateTime::from_timestamp(2_000, 0).unwrap();

        assert_eq!(capsule.time_until_reveal(before), Some(Duration::seconds(500)));
        assert!(capsule.is_revealed_at(after));
        assert_eq!(capsule.time_until_reveal(after), None);
    }
}
