//! # parley-server
//!
//! Real-time messaging relay.
//!
//! This binary provides:
//! - **WebSocket sessions** carrying chat, read receipts, presence and call
//!   signaling as JSON events
//! - **Sealed private messages**: each private text is stored in plaintext
//!   for its sender and sealed to the recipient's X25519 key
//! - **Per-group permissions** checked on every send and group call
//! - **REST API** (axum) for groups, history and participant provisioning
//! - **Per-IP and per-session rate limiting** to protect against abuse

mod api;
mod backend;
mod config;
mod error;
mod groups;
mod guard;
mod history;
mod hub;
mod lanes;
mod messaging;
mod pipeline;
mod rate_limit;
mod registry;
mod router;
mod signaling;
#[cfg(test)]
mod testing;
mod ws;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_shared::credential::TokenIssuer;
use parley_store::Database;

use crate::api::AppState;
use crate::backend::SqliteBackend;
use crate::config::ServerConfig;
use crate::hub::{Hub, HubSettings};
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let backend = Arc::new(SqliteBackend::new(db));

    let ttl = chrono::Duration::hours(config.token_ttl_hours);
    let issuer = match config.token_signing_key {
        Some(seed) => TokenIssuer::from_seed(&seed, ttl),
        None => {
            warn!("TOKEN_SIGNING_KEY not set; issued tokens will not survive a restart");
            TokenIssuer::generate(ttl)
        }
    };

    let hub = Arc::new(Hub::new(
        HubSettings::from(&config),
        issuer.verifier(),
        backend.clone(),
        backend,
    ));

    // HTTP: 10 req/s sustained, burst of 30
    let rate_limiter = RateLimiter::default();
    let event_limiter = RateLimiter::new(config.events_per_second, config.event_burst);

    let app_state = AppState {
        hub,
        issuer: Arc::new(issuer),
        rate_limiter: rate_limiter.clone(),
        event_limiter,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
