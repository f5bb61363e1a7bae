use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Violations of the group administration rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("Only the group creator can {0}")]
    NotCreator(&'static str),

    #[error("Participant is already a member of this group")]
    AlreadyMember,

    #[error("Member not found in group")]
    MemberNotFound,

    #[error("Cannot modify the creator's permissions")]
    CreatorImmutable,

    #[error("The creator cannot remove themselves; delete the group instead")]
    CreatorCannotLeave,

    #[error("Group name is required")]
    EmptyName,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Missing credential")]
    Missing,

    #[error("Malformed credential")]
    Malformed,

    #[error("Invalid credential signature")]
    BadSignature,

    #[error("Credential expired")]
    Expired,
}
