//! AEAD envelope encryption for authorization-code payloads.
//!
//! Keys are rotation-ordered: the first is used for new encryptions, every
//! configured key is tried on decrypt so a code issued under a retired key
//! still redeems until it naturally expires.

use chacha20poly1305::aead::{Aead, AeadCore, OsRng, Payload};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 24;

/// Encrypts and decrypts authorization-code envelopes with a rotation-ordered
/// key list.
pub struct CodeCipher {
    ciphers: Vec<XChaCha20Poly1305>,
}

impl CodeCipher {
    /// Build a cipher from raw key material, newest/active key first. Each
    /// entry is hashed down to a 256-bit key regardless of its input length.
    pub fn new(raw_keys: &[Vec<u8>]) -> Result<Self> {
        if raw_keys.is_empty() {
            return Err(Error::Crypto("no AEAD keys configured".into()));
        }
        let ciphers = raw_keys.iter().map(|k| derive_cipher(k)).collect();
        Ok(Self { ciphers })
    }

    /// Encrypt `plaintext` under the active (first) key, binding `aad`.
    pub fn encrypt(&self, aad: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.ciphers.first().expect("constructor rejects empty key list");
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext,
            aad: aad.as_bytes(),
        };
        let ciphertext = cipher.encrypt(&nonce, payload).map_err(|_| Error::Crypto("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `data`, trying each configured key in rotation order, and
    /// checking `aad` matches what was bound at encryption time.
    pub fn decrypt(&self, aad: &str, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        for cipher in &self.ciphers {
            let payload = Payload {
                msg: ciphertext,
                aad: aad.as_bytes(),
            };
            if let Ok(plaintext) = cipher.decrypt(nonce, payload) {
                return Ok(plaintext);
            }
        }
        Err(Error::Crypto("decryption failed under all configured keys".into()))
    }
}

fn derive_cipher(raw: &[u8]) -> XChaCha20Poly1305 {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    let digest = hasher.finalize();
    let mut key_bytes: [u8; 32] = digest.as_slice().try_into().expect("SHA-256 digest is always 32 bytes");
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    key_bytes.zeroize();
    cipher
}

/// Associated data binding a code envelope's ciphertext to its lookup key, so
/// a ciphertext swap between two stored codes fails to decrypt.
#[must_use]
pub fn code_aad(code_key: &str) -> String {
    format!("downstream-oidc-code:{code_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CodeCipher {
        CodeCipher::new(&[b"first-key-material".to_vec(), b"second-key-material".to_vec()]).unwrap()
    }

    #[test]
    fn round_trips_plaintext() {
        let cipher = cipher();
        let aad = code_aad("abc123");
        let ciphertext = cipher.encrypt(&aad, b"hello world").unwrap();
        let plaintext = cipher.decrypt(&aad, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello world");
    }

    #[test]
    fn rejects_mismatched_aad() {
        let cipher = cipher();
        let ciphertext = cipher.encrypt(&code_aad("abc123"), b"hello world").unwrap();
        assert!(cipher.decrypt(&code_aad("different"), &ciphertext).is_err());
    }

    #[test]
    fn decrypts_under_a_retired_key() {
        let aad = code_aad("abc123");
        let old_cipher = CodeCipher::new(&[b"retired-key".to_vec()]).unwrap();
        let ciphertext = old_cipher.encrypt(&aad, b"payload").unwrap();

        let rotated = CodeCipher::new(&[b"new-active-key".to_vec(), b"retired-key".to_vec()]).unwrap();
        assert_eq!(rotated.decrypt(&aad, &ciphertext).unwrap(), b"payload");
    }

    #[test]
    fn empty_key_list_is_rejected() {
        assert!(CodeCipher::new(&[]).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let cipher = cipher();
        assert!(cipher.decrypt(&code_aad("k"), b"short").is_err());
    }
}
