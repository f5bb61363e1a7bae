//! WebSocket transport: one reader loop and one writer task per connection.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent};

use crate::api::{bearer_token, AppState};
use crate::error::ServerError;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// Verify the credential before upgrading. A rejected handshake gets a
/// plain 401 and never sees an event.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let credential = params
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string))
        .unwrap_or_default();

    if let Err(e) = state.hub.authenticate(&credential) {
        debug!(error = %e, "Rejected WebSocket handshake");
        return ServerError::from(e).into_response();
    }

    ws.on_upgrade(move |socket| run_session(state, socket, credential))
}

async fn run_session(state: AppState, socket: WebSocket, credential: String) {
    let (session, mut outbox) = match state.hub.open(&credential).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!(error = %e, "Session rejected after upgrade");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session = %session.id().short(), error = %e, "Socket read failed");
                break;
            }
        };

        if !state.event_limiter.check(session.id()).await {
            session.send(ServerEvent::error("Too many events, slow down"));
            continue;
        }

        match ClientEvent::from_json(&text) {
            Ok(event) => state.hub.dispatch(&session, event).await,
            Err(e) => {
                session.send(ServerEvent::error(format!("Malformed event: {e}")));
            }
        }
    }

    state.hub.close(&session).await;
    state.event_limiter.forget(&session.id()).await;
    writer.abort();
}
