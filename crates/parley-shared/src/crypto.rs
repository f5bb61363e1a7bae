//! Anonymous public-key encryption ("sealed boxes").
//!
//! A sender who only knows the recipient's X25519 public key generates an
//! ephemeral keypair, derives a one-time XChaCha20-Poly1305 key from the
//! Diffie-Hellman output with BLAKE3, and ships the ephemeral public key
//! alongside the ciphertext. Only the holder of the recipient's secret key can
//! re-derive the key. The server seals; it never opens.
//!
//! Wire form: `base64(ephemeral_pk || nonce || ciphertext)`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_SEALED_BOX, NONCE_SIZE, PUBKEY_SIZE, TAG_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

/// A participant's X25519 keypair. Lives on the client.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(secret),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// Base64 form stored in the directory and handed to senders.
    pub fn public_key_b64(&self) -> String {
        STANDARD.encode(self.public_key().as_bytes())
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

/// Decode a base64 X25519 public key.
pub fn parse_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let arr: [u8; PUBKEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        CryptoError::MalformedKey(format!("expected {PUBKEY_SIZE} bytes, got {}", bytes.len()))
    })?;
    Ok(PublicKey::from(arr))
}

/// Encrypt `plaintext` so only the owner of `recipient_key` can read it.
///
/// Rejects payloads longer than `max_len` bytes.
pub fn seal(recipient_key: &str, plaintext: &[u8], max_len: usize) -> Result<String, CryptoError> {
    if plaintext.len() > max_len {
        return Err(CryptoError::PayloadTooLarge {
            size: plaintext.len(),
            max: max_len,
        });
    }

    let recipient = parse_public_key(recipient_key)?;
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pk = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);

    // A low-order recipient key yields an all-zero secret.
    if !shared.was_contributory() {
        return Err(CryptoError::MalformedKey("low-order public key".into()));
    }

    let key = derive_sealing_key(shared.as_bytes(), &ephemeral_pk, &recipient);
    let body = encrypt(&key, plaintext)?;

    let mut out = Vec::with_capacity(PUBKEY_SIZE + body.len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&body);
    Ok(STANDARD.encode(out))
}

/// Open a sealed box with the recipient's keypair.
pub fn open_sealed(keypair: &KeyPair, sealed: &str) -> Result<Vec<u8>, CryptoError> {
    let data = STANDARD
        .decode(sealed.trim())
        .map_err(|_| CryptoError::DecryptionFailed)?;
    if data.len() < PUBKEY_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (pk_bytes, body) = data.split_at(PUBKEY_SIZE);
    let pk_arr: [u8; PUBKEY_SIZE] = pk_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    let ephemeral_pk = PublicKey::from(pk_arr);

    let shared = keypair.secret.diffie_hellman(&ephemeral_pk);
    let key = derive_sealing_key(shared.as_bytes(), &ephemeral_pk, &keypair.public_key());
    decrypt(&key, body)
}

// BLAKE3 KDF with domain separation, binding both public keys
fn derive_sealing_key(shared: &[u8], ephemeral: &PublicKey, recipient: &PublicKey) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEALED_BOX);
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
