/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Default upper bound on sealed plaintext (16 KiB)
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 16 * 1024;

/// Default number of queued outbound events per session
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SEALED_BOX: &str = "parley-sealed-box-v1";
pub const KDF_CONTEXT_ACCESS_TOKEN: &str = "parley-access-token-v1";
