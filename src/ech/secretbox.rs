//! Symmetric envelope encryption for at-rest key material.
//!
//! Output format is self-describing: `nonce_len(u8) ‖ nonce ‖ ciphertext‖tag`
//! so ciphertexts can be decrypted without external framing. A decrypt
//! failure is an error for the affected blob, never silently ignored.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// ChaCha20-Poly1305 nonce size.
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretBoxError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (wrong key or corrupted blob)")]
    Decrypt,

    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
}

/// AEAD envelope over the process master key.
#[derive(Clone)]
pub struct SecretBox {
    cipher: ChaCha20Poly1305,
}

impl SecretBox {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Encrypt a blob under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecretBoxError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| SecretBoxError::Encrypt)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(NONCE_LEN as u8);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt an envelope produced by [`SecretBox::encrypt`].
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, SecretBoxError> {
        let (&nonce_len, rest) = envelope
            .split_first()
            .ok_or(SecretBoxError::Malformed("empty envelope"))?;
        if nonce_len as usize != NONCE_LEN {
            return Err(SecretBoxError::Malformed("unexpected nonce length"));
        }
        if rest.len() < NONCE_LEN {
            return Err(SecretBoxError::Malformed("truncated nonce"));
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretBoxError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secretbox() -> SecretBox {
        SecretBox::new(&[7u8; 32])
    }

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let sb = secretbox();
        for plaintext in [&b""[..], b"k", b"arbitrary byte strings \x00\xff\x01"] {
            let envelope = sb.encrypt(plaintext).unwrap();
            assert_eq!(sb.decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonces_are_unique_per_call() {
        let sb = secretbox();
        let a = sb.encrypt(b"same").unwrap();
        let b = sb.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let envelope = secretbox().encrypt(b"secret").unwrap();
        let other = SecretBox::new(&[8u8; 32]);
        assert!(matches!(
            other.decrypt(&envelope),
            Err(SecretBoxError::Decrypt)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let sb = secretbox();
        let mut envelope = sb.encrypt(b"secret").unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        assert!(sb.decrypt(&envelope).is_err());
    }

    #[test]
    fn malformed_envelopes_rejected() {
        let sb = secretbox();
        assert!(sb.decrypt(&[]).is_err());
        assert!(sb.decrypt(&[11, 0, 0]).is_err());
        assert!(sb.decrypt(&[12, 1, 2, 3]).is_err());
    }
}
