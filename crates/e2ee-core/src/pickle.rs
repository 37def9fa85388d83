//! Re-encryption of secret material to opaque transportable blobs.
//!
//! Used by the migration protocol: every secret leaving the legacy store is
//! re-encrypted under a short-lived transport key before it crosses the
//! process boundary to the replacement engine.

use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::utils::kdf;
use crate::{Error, Result};

const PICKLE_KDF_SALT: &[u8] = b"e2ee-core-pickle-v1";
const NONCE_LEN: usize = 12;

pub fn pickle(pickle_key: &[u8; 32], plaintext: &[u8]) -> Result<String> {
    let subkey = kdf(pickle_key, PICKLE_KDF_SALT, 1)[0];
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&subkey));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::Encryption("pickle encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(blob))
}

pub fn unpickle(pickle_key: &[u8; 32], pickled: &str) -> Result<Vec<u8>> {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(pickled)
        .map_err(|e| Error::Decryption(e.to_string()))?;

    if blob.len() < NONCE_LEN {
        return Err(Error::Decryption("pickle too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let subkey = kdf(pickle_key, PICKLE_KDF_SALT, 1)[0];
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&subkey));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::Decryption("pickle decryption failed".to_string()))
}
