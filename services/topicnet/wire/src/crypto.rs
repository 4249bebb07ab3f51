//! Channel sealing for secured sessions.
//!
//! Both ends derive the same 32-byte key with x25519 (own secret, peer public)
//! and seal payloads with ChaCha20-Poly1305. Nonces are implicit: a direction
//! byte plus a per-direction frame counter, which is safe because frames ride
//! an ordered, reliable stream and every sealed frame advances the counter.

use bytes::Bytes;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of x25519 keys in bytes
pub const KEY_LEN: usize = 32;

/// Crypto errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Peer key produced a non-contributory shared secret
    #[error("peer public key is weak")]
    WeakKey,
    /// Sealing failed
    #[error("seal failed")]
    Seal,
    /// Authentication tag did not verify
    #[error("open failed")]
    Open,
}

/// Which side of the channel this cipher belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Publisher (server) side
    Publisher,
    /// Subscriber (client) side
    Subscriber,
}

impl Role {
    fn send_tag(self) -> u8 {
        match self {
            Role::Publisher => 0x01,
            Role::Subscriber => 0x02,
        }
    }

    fn recv_tag(self) -> u8 {
        match self {
            Role::Publisher => 0x02,
            Role::Subscriber => 0x01,
        }
    }
}

/// Derive the public key belonging to a secret key
pub fn public_from_secret(secret: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*secret);
    PublicKey::from(&secret).to_bytes()
}

/// Compute the shared channel key from our secret and the peer's public key
pub fn shared_key(
    secret: &[u8; KEY_LEN],
    peer_public: &[u8; KEY_LEN],
) -> Result<[u8; KEY_LEN], CryptoError> {
    let secret = StaticSecret::from(*secret);
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKey);
    }
    Ok(shared.to_bytes())
}

/// Stateful AEAD cipher for one connection
pub struct ChannelCipher {
    cipher: ChaCha20Poly1305,
    role: Role,
    send_counter: u64,
    recv_counter: u64,
}

impl ChannelCipher {
    /// Create a cipher from a shared key
    pub fn new(key: &[u8; KEY_LEN], role: Role) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            role,
            send_counter: 0,
            recv_counter: 0,
        }
    }

    fn nonce(tag: u8, counter: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[0] = tag;
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Seal a payload; `aad` is authenticated but not encrypted
    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Bytes, CryptoError> {
        let nonce = Self::nonce(self.role.send_tag(), self.send_counter);
        self.send_counter += 1;

        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map(Bytes::from)
            .map_err(|_| CryptoError::Seal)
    }

    /// Open a sealed payload. The receive counter advances even on failure
    /// so a single corrupt frame does not desynchronise the stream.
    pub fn open(&mut self, aad: &[u8], sealed: &[u8]) -> Result<Bytes, CryptoError> {
        let nonce = Self::nonce(self.role.recv_tag(), self.recv_counter);
        self.recv_counter += 1;

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: sealed, aad })
            .map(Bytes::from)
            .map_err(|_| CryptoError::Open)
    }
}

impl std::fmt::Debug for ChannelCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCipher")
            .field("role", &self.role)
            .field("send_counter", &self.send_counter)
            .field("recv_counter", &self.recv_counter)
            .finish()
    }
}
