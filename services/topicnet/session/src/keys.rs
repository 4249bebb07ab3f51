//! Key material for secured sessions.
//!
//! Keys are 32-byte x25519 values exchanged as 40-character Z85 strings.
//! Secret keys are never logged; `Debug` output redacts them.

use crate::error::{Result, SessionError};
use crate::topic::TopicDescriptor;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use topicnet_wire::{public_from_secret, KEY_LEN};

/// Length of a Z85-encoded key
pub const ENCODED_KEY_LEN: usize = 40;

/// Encode 32 bytes as Z85
pub fn z85_encode(bytes: &[u8; KEY_LEN]) -> String {
    z85::encode(bytes)
}

/// Decode a 40-character Z85 key; `kind` names the key in error messages
pub fn z85_decode(kind: &str, text: &str) -> Result<[u8; KEY_LEN]> {
    if text.len() != ENCODED_KEY_LEN {
        return Err(SessionError::InvalidKey(format!(
            "{} must be {} characters, got {}",
            kind,
            ENCODED_KEY_LEN,
            text.len()
        )));
    }

    let decoded = z85::decode(text)
        .map_err(|e| SessionError::InvalidKey(format!("{} is not valid Z85: {:?}", kind, e)))?;
    let bytes: [u8; KEY_LEN] = decoded
        .try_into()
        .map_err(|_| SessionError::InvalidKey(format!("{} does not decode to {} bytes", kind, KEY_LEN)))?;

    // Blocks above u32::MAX do not survive a round trip
    if z85::encode(bytes) != text {
        return Err(SessionError::InvalidKey(format!("{} is not valid Z85", kind)));
    }
    Ok(bytes)
}

/// Validated public key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    text: String,
    bytes: [u8; KEY_LEN],
}

impl PublicKey {
    /// Parse and validate a Z85 public key
    pub fn parse(text: &str) -> Result<Self> {
        let bytes = z85_decode("public key", text)?;
        Ok(Self {
            text: text.to_string(),
            bytes,
        })
    }

    /// Z85 text form
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            text: z85_encode(&bytes),
            bytes,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}…)", &self.text[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// This process's public/secret key pair
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    secret_text: String,
    secret: [u8; KEY_LEN],
}

impl KeyPair {
    /// Validate a key pair; both keys must be 40-char Z85 and belong together
    pub fn new(public_key: &str, secret_key: &str) -> Result<Self> {
        let public = PublicKey::parse(public_key)?;
        let secret = z85_decode("secret key", secret_key)?;

        if public_from_secret(&secret) != *public.as_bytes() {
            return Err(SessionError::InvalidKey(
                "public key does not match secret key".to_string(),
            ));
        }

        Ok(Self {
            public,
            secret_text: secret_key.to_string(),
            secret,
        })
    }

    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let secret: [u8; KEY_LEN] = rand::random();
        let public = PublicKey::from_bytes(public_from_secret(&secret));
        Self {
            public,
            secret_text: z85_encode(&secret),
            secret,
        }
    }

    /// Public half
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Secret half in Z85 form
    pub fn secret_key(&self) -> &str {
        &self.secret_text
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Validate a secured-topic mapping in iteration order.
///
/// Every topic must be flagged secured and every server key must be a valid
/// public key; the first offending entry aborts validation.
pub fn validate_secured_topics<I, S>(topics: I) -> Result<Vec<(TopicDescriptor, PublicKey)>>
where
    I: IntoIterator<Item = (TopicDescriptor, S)>,
    S: AsRef<str>,
{
    let mut validated = Vec::new();
    for (topic, server_key) in topics {
        if !topic.is_secured() {
            return Err(SessionError::TopicNotSecured(topic.name().to_string()));
        }
        let key = PublicKey::parse(server_key.as_ref())?;
        validated.push((topic, key));
    }
    Ok(validated)
}

#[derive(Default)]
struct KeyStoreState {
    own: Option<KeyPair>,
    servers: HashMap<String, PublicKey>,
}

/// Process key store: own key pair plus known server keys per topic name
#[derive(Default)]
pub struct KeyStore {
    state: RwLock<KeyStoreState>,
}

impl KeyStore {
    /// Create an empty key store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set this process's key pair
    pub fn set_own_keys(&self, keys: KeyPair) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .own = Some(keys);
    }

    /// This process's key pair, if configured
    pub fn own_keys(&self) -> Option<KeyPair> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .own
            .clone()
    }

    /// Remember the server public key for a topic name
    pub fn set_server_key(&self, topic: &str, server_key: &str) -> Result<()> {
        let key = PublicKey::parse(server_key)?;
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .servers
            .insert(topic.to_string(), key);
        Ok(())
    }

    /// Server public key known for a topic name
    pub fn server_key(&self, topic: &str) -> Option<PublicKey> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .servers
            .get(topic)
            .cloned()
    }

    /// Forget all key material
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.own = None;
        state.servers.clear();
    }
}
