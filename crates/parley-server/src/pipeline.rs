use parley_shared::crypto;
use parley_shared::error::CryptoError;
use parley_shared::types::MessageBody;

/// Plaintext for the sender's copy and the sealed copy for the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualBody {
    pub plaintext: String,
    pub ciphertext: String,
}

impl From<DualBody> for MessageBody {
    fn from(dual: DualBody) -> Self {
        MessageBody::Text {
            plaintext: dual.plaintext,
            ciphertext: Some(dual.ciphertext),
        }
    }
}

/// Seals private text to the recipient's public key before it is stored.
///
/// Nothing is persisted or delivered when sealing fails.
#[derive(Debug, Clone)]
pub struct EncryptionPipeline {
    max_content_bytes: usize,
}

impl EncryptionPipeline {
    pub fn new(max_content_bytes: usize) -> Self {
        Self { max_content_bytes }
    }

    pub fn prepare(&self, text: &str, recipient_key: &str) -> Result<DualBody, CryptoError> {
        let ciphertext = crypto::seal(recipient_key, text.as_bytes(), self.max_content_bytes)?;
        Ok(DualBody {
            plaintext: text.to_string(),
            ciphertext,
        })
    }
}
