//! Signed access credentials.
//!
//! A credential is `base64url(claims) "." base64url(signature)` where the
//! claims are the JSON `{ "sub": <participant id>, "exp": <unix seconds> }`
//! and the signature is Ed25519 by the server's signing key over the
//! domain-separated encoded claims. Clients treat it as an opaque bearer
//! string.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::constants::KDF_CONTEXT_ACCESS_TOKEN;
use crate::error::CredentialError;
use crate::types::ParticipantId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Claims {
    sub: ParticipantId,
    exp: i64,
}

fn signing_payload(encoded_claims: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(KDF_CONTEXT_ACCESS_TOKEN.len() + 1 + encoded_claims.len());
    payload.extend_from_slice(KDF_CONTEXT_ACCESS_TOKEN.as_bytes());
    payload.push(b'|');
    payload.extend_from_slice(encoded_claims.as_bytes());
    payload
}

/// Mints credentials. Held only by the server.
#[derive(Clone)]
pub struct TokenIssuer {
    signing_key: SigningKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn from_seed(seed: &[u8; 32], ttl: Duration) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            ttl,
        }
    }

    /// A throwaway issuer; credentials die with the process.
    pub fn generate(ttl: Duration) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            ttl,
        }
    }

    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.signing_key.verifying_key())
    }

    pub fn issue(&self, participant: ParticipantId) -> String {
        self.issue_until(participant, Utc::now() + self.ttl)
    }

    pub fn issue_until(&self, participant: ParticipantId, valid_until: DateTime<Utc>) -> String {
        let claims = Claims {
            sub: participant,
            exp: valid_until.timestamp(),
        };
        // Serializing a struct of a uuid and an integer cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = self.signing_key.sign(&signing_payload(&encoded));
        format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }
}

/// Checks credentials against the issuer's public key.
#[derive(Clone)]
pub struct TokenVerifier {
    key: VerifyingKey,
}

impl TokenVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn verify(&self, token: &str) -> Result<ParticipantId, CredentialError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<ParticipantId, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }

        let (encoded, sig_part) = token.split_once('.').ok_or(CredentialError::Malformed)?;
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| CredentialError::Malformed)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| CredentialError::Malformed)?;

        self.key
            .verify(&signing_payload(encoded), &signature)
            .map_err(|_| CredentialError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CredentialError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&json).map_err(|_| CredentialError::Malformed)?;

        if now.timestamp() >= claims.exp {
            return Err(CredentialError::Expired);
        }
        Ok(claims.sub)
    }
}
