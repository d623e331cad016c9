// src/crypto.rs
//! Encryption at rest for stored error messages.
//!
//! Tokens are `base64(nonce || ciphertext || tag)` under ChaCha20-Poly1305
//! with a fresh random nonce per call. The key is SHA-256 of the configured
//! secret (primary, else site-wide fallback). Without any secret the cipher
//! runs fail-open and stores plaintext. Anything that does not authenticate
//! on decrypt is treated as legacy unencrypted data and returned as-is.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Payload;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct Cipher {
    aead: Option<ChaCha20Poly1305>,
    warned_fail_open: AtomicBool,
}

impl Cipher {
    /// Build from the primary secret, falling back to the site-wide one.
    pub fn from_secrets(primary: Option<&str>, fallback: Option<&str>) -> Self {
        let secret = primary
            .filter(|s| !s.trim().is_empty())
            .or_else(|| fallback.filter(|s| !s.trim().is_empty()));

        let aead = match secret.map(derive_cipher) {
            Some(Ok(aead)) => Some(aead),
            Some(Err(e)) => {
                warn!("Encryption key rejected, storing messages unencrypted: {}", e);
                None
            }
            None => None,
        };

        Self {
            aead,
            warned_fail_open: AtomicBool::new(false),
        }
    }

    /// A cipher with no key. Encrypt and decrypt are passthroughs.
    pub fn disabled() -> Self {
        Self::from_secrets(None, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.aead.is_some()
    }

    pub fn encrypt(&self, payload: &Payload) -> String {
        let plaintext = payload.canonical();

        let Some(aead) = &self.aead else {
            if !self.warned_fail_open.swap(true, Ordering::Relaxed) {
                warn!("No encryption secret configured; error messages are stored in plaintext");
            }
            return plaintext;
        };

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        match aead.encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                token.extend_from_slice(&nonce_bytes);
                token.extend_from_slice(&ciphertext);
                STANDARD.encode(token)
            }
            Err(e) => {
                warn!("Encryption failed, storing plaintext: {}", e);
                plaintext
            }
        }
    }

    pub fn decrypt(&self, token: &str) -> Payload {
        match self.try_decrypt(token) {
            Some(plaintext) => Payload::from_plaintext(&plaintext),
            None => Payload::from_plaintext(token),
        }
    }

    fn try_decrypt(&self, token: &str) -> Option<String> {
        let aead = self.aead.as_ref()?;
        let raw = STANDARD.decode(token.trim()).ok()?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        match aead.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => {
                debug!("Token did not authenticate; treating as legacy plaintext");
                None
            }
        }
    }
}

fn derive_cipher(secret: &str) -> Result<ChaCha20Poly1305> {
    let key = Sha256::digest(secret.as_bytes());
    ChaCha20Poly1305::new_from_slice(key.as_slice()).map_err(|e| Error::Crypto(e.to_string()))
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("enabled", &self.is_enabled()).finish()
    }
}
