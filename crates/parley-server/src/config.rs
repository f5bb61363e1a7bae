//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MAX_CONTENT_BYTES, DEFAULT_OUTBOX_CAPACITY,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley Relay"`
    pub instance_name: String,

    /// Ed25519 seed used to sign access credentials (hex-encoded, 64 chars).
    /// Env: `TOKEN_SIGNING_KEY`
    /// Default: none, a random key is generated per process.
    pub token_signing_key: Option<[u8; 32]>,

    /// Lifetime of issued access credentials, in hours.
    /// Env: `TOKEN_TTL_HOURS`
    /// Default: `24`
    pub token_ttl_hours: i64,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Largest private message body accepted for sealing, in bytes.
    /// Env: `MAX_CONTENT_BYTES`
    /// Default: 16 KiB
    pub max_content_bytes: usize,

    /// Outbound events queued per session before new ones are dropped.
    /// Env: `OUTBOX_CAPACITY`
    /// Default: `256`
    pub outbox_capacity: usize,

    /// Sustained inbound events per second allowed per session.
    /// Env: `EVENTS_PER_SECOND`
    /// Default: `20`
    pub events_per_second: f64,

    /// Inbound event burst allowed per session.
    /// Env: `EVENT_BURST`
    /// Default: `60`
    pub event_burst: f64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("instance_name", &self.instance_name)
            .field("token_signing_key", &self.token_signing_key.map(|_| "<redacted>"))
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("max_content_bytes", &self.max_content_bytes)
            .field("outbox_capacity", &self.outbox_capacity)
            .field("events_per_second", &self.events_per_second)
            .field("event_burst", &self.event_burst)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            instance_name: "Parley Relay".to_string(),
            token_signing_key: None,
            token_ttl_hours: 24,
            admin_token: None,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            events_per_second: 20.0,
            event_burst: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(hex_key) = var("TOKEN_SIGNING_KEY") {
            match parse_hex_key(&hex_key) {
                Ok(key) => config.token_signing_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_SIGNING_KEY, generating an ephemeral key"
                    );
                }
            }
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        parse_into(&var, "TOKEN_TTL_HOURS", &mut config.token_ttl_hours, |v: &i64| *v > 0);
        parse_into(&var, "MAX_CONTENT_BYTES", &mut config.max_content_bytes, |v| *v > 0);
        parse_into(&var, "OUTBOX_CAPACITY", &mut config.outbox_capacity, |v| *v > 0);
        parse_into(&var, "EVENTS_PER_SECOND", &mut config.events_per_second, |v: &f64| *v > 0.0);
        parse_into(&var, "EVENT_BURST", &mut config.event_burst, |v: &f64| *v >= 1.0);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
    valid: impl Fn(&T) -> bool,
) where
    T: std::str::FromStr,
{
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if valid(&v) => *slot = v,
        _ => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_key(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
