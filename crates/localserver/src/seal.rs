//! NaCl-box-style sealing (spec.md GLOSSARY "Sealing"): encrypt a response
//! body to a recipient X25519 public key under a freshly generated ephemeral
//! sender key pair. Reproduced with RustCrypto primitives (`x25519-dalek` +
//! `chacha20poly1305`) rather than a byte-for-byte `crypto_box` dependency,
//! following the pairing several repos in the retrieval pack standardize on.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand_core::RngCore;
use thiserror::Error;

use crate::chain::X25519PublicKey;

#[derive(Debug, Error, PartialEq)]
pub enum SealError {
    #[error("seal-failed")]
    EncryptFailed,
    #[error("unseal-failed")]
    DecryptFailed,
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
}

/// `{data, pubKey}` as returned to the DT4a caller (spec.md §4.3 step 8).
pub struct SealedEnvelope {
    /// `nonce || ciphertext`.
    pub data: Vec<u8>,
    /// The ephemeral sender public key, 32 bytes.
    pub pub_key: [u8; 32],
}

/// Seal `plaintext` to `recipient`, generating a fresh ephemeral key pair.
pub fn seal(plaintext: &[u8], recipient: X25519PublicKey) -> Result<SealedEnvelope, SealError> {
    let ephemeral_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral_secret);

    let recipient_key = x25519_dalek::PublicKey::from(recipient.0);
    let shared = ephemeral_secret.diffie_hellman(&recipient_key);

    let cipher = XChaCha20Poly1305::new_from_slice(shared.as_bytes())
        .map_err(|_| SealError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; 24];
    rand_core::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| SealError::EncryptFailed)?;

    let mut data = Vec::with_capacity(24 + ciphertext.len());
    data.extend_from_slice(&nonce_bytes);
    data.extend_from_slice(&ciphertext);

    Ok(SealedEnvelope {
        data,
        pub_key: *ephemeral_public.as_bytes(),
    })
}

/// Open a sealed envelope given the recipient's static secret and the
/// sender's ephemeral public key. Used by tests acting as the counter-party.
pub fn unseal(
    data: &[u8],
    sender_pub: [u8; 32],
    recipient_secret: &x25519_dalek::StaticSecret,
) -> Result<Vec<u8>, SealError> {
    if data.len() < 24 {
        return Err(SealError::Truncated);
    }
    let (nonce_bytes, ciphertext) = data.split_at(24);
    let sender_key = x25519_dalek::PublicKey::from(sender_pub);
    let shared = recipient_secret.diffie_hellman(&sender_key);

    let cipher = XChaCha20Poly1305::new_from_slice(shared.as_bytes())
        .map_err(|_| SealError::DecryptFailed)?;
    let nonce = XNonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SealError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_unseal_round_trips() {
        let recipient_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let recipient_public = x25519_dalek::PublicKey::from(&recipient_secret);

        let envelope = seal(b"the quick brown fox", X25519PublicKey(*recipient_public.as_bytes())).unwrap();
        let opened = unseal(&envelope.data, envelope.pub_key, &recipient_secret).unwrap();

        assert_eq!(opened, b"the quick brown fox");
    }

    #[test]
    fn wrong_recipient_fails_to_open() {
        let recipient_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let recipient_public = x25519_dalek::PublicKey::from(&recipient_secret);
        let impostor_secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);

        let envelope = seal(b"secret", X25519PublicKey(*recipient_public.as_bytes())).unwrap();
        let result = unseal(&envelope.data, envelope.pub_key, &impostor_secret);

        assert_eq!(result, Err(SealError::DecryptFailed));
    }
}
