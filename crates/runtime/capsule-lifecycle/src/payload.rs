//! Inner payload carried inside the time-lock
//!
//! ```text
//! ┌─────┬──────────────────────────────────────────┐
//! │ tag │ body                                     │
//! ├─────┼──────────────────────────────────────────┤
//! │ 01  │ UTF-8 message                 (public)   │
//! │ 02  │ "cv1$..." password string     (private)  │
//! │ 03  │ nonce || box, key held apart  (keyed)    │
//! └─────┴──────────────────────────────────────────┘
//! ```

use capsule_cipher::{open_anonymous, open_password, CapsuleKey};
use capsule_core::{Error, Result, ValidationError};
use zeroize::Zeroizing;

const TAG_PLAIN: u8 = 0x01;
const TAG_PASSWORD: u8 = 0x02;
const TAG_KEYED: u8 = 0x03;

/// The second encryption layer, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerPayload {
    Plain(String),
    Password(String),
    Keyed(Vec<u8>),
}

impl InnerPayload {
    pub fn encode(&self) -> Vec<u8> {
        let (tag, body) = match self {
            Self::Plain(text) => (TAG_PLAIN, text.as_bytes()),
            Self::Password(sealed) => (TAG_PASSWORD, sealed.as_bytes()),
            Self::Keyed(sealed) => (TAG_KEYED, sealed.as_slice()),
        };
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(tag);
        out.extend_from_slice(body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| Error::CorruptCiphertext("empty inner payload".into()))?;
        match tag {
            TAG_PLAIN => Ok(Self::Plain(utf8(body)?)),
            TAG_PASSWORD => Ok(Self::Password(utf8(body)?)),
            TAG_KEYED => Ok(Self::Keyed(body.to_vec())),
            other => Err(Error::CorruptCiphertext(format!("unknown payload tag {other:#04x}"))),
        }
    }

    /// Remove the inner layer.
    pub fn open(&self, credentials: &Credentials) -> Result<String> {
        match self {
            Self::Plain(text) => Ok(text.clone()),
            Self::Password(sealed) => {
                let password = credentials
                    .password
                    .as_ref()
                    .ok_or(ValidationError::MissingPassword)?;
                let plaintext = open_password(sealed, password)?;
                utf8(&plaintext)
            }
            Self::Keyed(sealed) => {
                let key = credentials.key.as_ref().ok_or(ValidationError::MissingKey)?;
                let plaintext = open_anonymous(sealed, key)?;
                utf8(&plaintext)
            }
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::CorruptCiphertext("payload is not UTF-8".into()))
}

/// Secrets a reader supplies for the inner layer
#[derive(Clone, Default)]
pub struct Credentials {
    password: Option<Zeroizing<String>>,
    key: Option<CapsuleKey>,
}

impl Credentials {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    pub fn with_key(mut self, key: CapsuleKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn has_password(&self) -> bool {
        self.password.as_ref().is_some_and(|p| !p.is_empty())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_cipher::{seal_anonymous, seal_password_with, PasswordParams};

    fn light() -> PasswordParams {
        PasswordParams {
            memory_kib: 1024,
            iterations: 1,
            lanes: 1,
        }
    }

    #[test]
    fn test_framing() {
        let payload = InnerPayload::Plain("hello future".into());
        let bytes = payload.encode();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(InnerPayload::decode(&bytes).unwrap(), payload);

        assert!(matches!(InnerPayload::decode(&[]), Err(Error::CorruptCiphertext(_))));
        assert!(matches!(InnerPayload::decode(&[0x7f, 1]), Err(Error::CorruptCiphertext(_))));
        assert!(matches!(
            InnerPayload::decode(&[0x01, 0xff, 0xfe]),
            Err(Error::CorruptCiphertext(_))
        ));
    }

    #[test]
    fn test_empty_plain_message_is_valid() {
        let payload = InnerPayload::decode(&[0x01]).unwrap();
        assert_eq!(payload.open(&Credentials::none()).unwrap(), "");
    }

    #[test]
    fn test_password_layer() {
        let sealed = seal_password_with(light(), "vault".as_bytes(), "pw").unwrap();
        let payload = InnerPayload::Password(sealed);

        assert!(matches!(
            payload.open(&Credentials::none()),
            Err(Error::Validation(ValidationError::MissingPassword))
        ));
        assert!(matches!(
            payload.open(&Credentials::none().with_password("nope")),
            Err(Error::WrongPassword)
        ));
        assert_eq!(payload.open(&Credentials::none().with_password("pw")).unwrap(), "vault");
    }

    #[test]
    fn test_keyed_layer() {
        let (sealed, key) = seal_anonymous("boxed".as_bytes()).unwrap();
        let payload = InnerPayload::decode(&InnerPayload::Keyed(sealed).encode()).unwrap();

        assert!(matches!(
            payload.open(&Credentials::none()),
            Err(Error::Validation(ValidationError::MissingKey))
        ));
        assert!(matches!(
            payload.open(&Credentials::none().with_key(CapsuleKey::generate())),
            Err(Error::Integrity)
        ));
        assert_eq!(payload.open(&Credentials::none().with_key(key)).unwrap(), "boxed");
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::none().with_password("hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
        assert!(creds.has_password());
        assert!(!Credentials::none().with_password("").has_password());
    }
}
