use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::credential::{TokenIssuer, TokenVerifier};
use parley_shared::protocol::ChatMessageView;
use parley_shared::types::{Group, GroupId, Participant, ParticipantId, SessionId};

use crate::backend::SqliteBackend;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::{Hub, HubStats};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_upgrade;

pub type AppHub = Hub<TokenVerifier, SqliteBackend, SqliteBackend>;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<AppHub>,
    pub issuer: Arc<TokenIssuer>,
    pub rate_limiter: RateLimiter<IpAddr>,
    pub event_limiter: RateLimiter<SessionId>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_upgrade))
        .route("/api/me", get(whoami))
        .route("/api/participants/:participant_id", get(participant_profile))
        .route("/api/groups", get(list_groups).post(create_group))
        .route("/api/groups/:group_id", get(get_group).delete(delete_group))
        .route("/api/groups/:group_id/members", post(add_member))
        .route(
            "/api/groups/:group_id/members/:participant_id",
            put(set_permissions).delete(remove_member),
        )
        .route("/api/messages/private/:participant_id", get(private_history))
        .route("/api/messages/group/:group_id", get(group_history))
        .route("/admin/status", get(admin_status))
        .route("/admin/participants", post(admin_register_participant))
        .route("/admin/tokens", post(admin_issue_token))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    max_content_bytes: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminStatusResponse {
    name: String,
    #[serde(flatten)]
    stats: HubStats,
}

/// What other participants may see about someone.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    id: ParticipantId,
    name: String,
    status: &'static str,
    online: bool,
    public_key: String,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    user_id: ParticipantId,
    #[serde(default)]
    can_send_messages: bool,
    #[serde(default)]
    can_call: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsRequest {
    #[serde(default)]
    can_send_messages: Option<bool>,
    #[serde(default)]
    can_call: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterParticipantRequest {
    name: String,
    public_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueTokenRequest {
    participant_id: ParticipantId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialResponse {
    participant: Participant,
    token: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        max_content_bytes: state.config.max_content_bytes,
    })
}

/// `Authorization: Bearer <token>`, or the bare header value.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
    (!token.is_empty()).then_some(token)
}

fn caller(headers: &HeaderMap, state: &AppState) -> Result<ParticipantId, ServerError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ServerError::Unauthorized("Missing bearer token".into()))?;
    Ok(state.hub.authenticate(token)?)
}

async fn whoami(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Participant>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.participant(me).await?))
}

async fn participant_profile(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(participant_id): Path<ParticipantId>,
) -> Result<Json<ProfileResponse>, ServerError> {
    caller(&headers, &state)?;
    let p = state.hub.participant(participant_id).await?;
    Ok(Json(ProfileResponse {
        id: p.id,
        name: p.name,
        status: p.status.as_str(),
        online: state.hub.is_online(p.id).await,
        public_key: p.public_key,
    }))
}

async fn list_groups(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Group>>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.groups_of(me).await?))
}

async fn create_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Group>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.create_group(me, &req.name).await?))
}

async fn get_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Group>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.group_for_member(me, group_id).await?))
}

async fn delete_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let me = caller(&headers, &state)?;
    state.hub.delete_group(me, group_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn add_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<Group>, ServerError> {
    let me = caller(&headers, &state)?;
    let group = state
        .hub
        .add_member(me, group_id, req.user_id, req.can_send_messages, req.can_call)
        .await?;
    Ok(Json(group))
}

async fn set_permissions(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((group_id, participant_id)): Path<(GroupId, ParticipantId)>,
    Json(req): Json<PermissionsRequest>,
) -> Result<Json<Group>, ServerError> {
    let me = caller(&headers, &state)?;
    let group = state
        .hub
        .set_permissions(me, group_id, participant_id, req.can_send_messages, req.can_call)
        .await?;
    Ok(Json(group))
}

async fn remove_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((group_id, participant_id)): Path<(GroupId, ParticipantId)>,
) -> Result<Json<Group>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.remove_member(me, group_id, participant_id).await?))
}

async fn private_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(participant_id): Path<ParticipantId>,
) -> Result<Json<Vec<ChatMessageView>>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.private_history(me, participant_id).await?))
}

async fn group_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Vec<ChatMessageView>>, ServerError> {
    let me = caller(&headers, &state)?;
    Ok(Json(state.hub.group_history(me, group_id).await?))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        stats: state.hub.stats().await,
    }))
}

async fn admin_register_participant(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<RegisterParticipantRequest>,
) -> Result<Json<CredentialResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let participant = state
        .hub
        .register_participant(&req.name, &req.public_key)
        .await?;
    let token = state.issuer.issue(participant.id);

    info!(participant = %participant.id, "Admin provisioned participant");
    Ok(Json(CredentialResponse { participant, token }))
}

async fn admin_issue_token(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<Json<CredentialResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let participant = state.hub.participant(req.participant_id).await?;
    let token = state.issuer.issue(participant.id);

    info!(participant = %participant.id, "Admin issued token");
    Ok(Json(CredentialResponse { participant, token }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use parley_shared::crypto::KeyPair;
    use parley_store::Database;
    use tower::ServiceExt;

    use crate::hub::HubSettings;

    fn test_state(admin_token: Option<&str>) -> AppState {
        let config = ServerConfig {
            admin_token: admin_token.map(str::to_string),
            ..ServerConfig::default()
        };
        let backend = Arc::new(SqliteBackend::new(Database::open_in_memory().unwrap()));
        let issuer = TokenIssuer::generate(chrono::Duration::hours(1));
        let hub = Hub::new(
            HubSettings::from(&config),
            issuer.verifier(),
            backend.clone(),
            backend,
        );
        AppState {
            hub: Arc::new(hub),
            issuer: Arc::new(issuer),
            rate_limiter: RateLimiter::new(1000.0, 1000.0),
            event_limiter: RateLimiter::new(1000.0, 1000.0),
            config: Arc::new(config),
        }
    }

    async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn provision(state: &AppState, name: &str) -> (ParticipantId, String) {
        let (status, body) = send(
            state,
            Method::POST,
            "/admin/participants",
            Some("admin"),
            Some(serde_json::json!({
                "name": name,
                "publicKey": KeyPair::generate().public_key_b64(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = ParticipantId::parse(body["participant"]["id"].as_str().unwrap()).unwrap();
        (id, body["token"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state(None);
        let (status, body) = send(&state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let state = test_state(None);
        let (status, _) = send(&state, Method::GET, "/admin/status", Some("x"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_status_reports_counts() {
        let state = test_state(Some("admin"));
        let (status, _) = send(&state, Method::GET, "/admin/status", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&state, Method::GET, "/admin/status", Some("admin"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"], 0);
        assert!(body["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn test_api_requires_credential() {
        let state = test_state(Some("admin"));
        let (status, _) = send(&state, Method::GET, "/api/groups", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&state, Method::GET, "/api/groups", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ws_rejects_bad_credential_before_upgrade() {
        let state = test_state(None);
        let req = Request::builder()
            .uri("/ws?token=forged")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[tokio::test]
    async fn test_group_lifecycle_over_http() {
        let state = test_state(Some("admin"));
        let (_, owner_token) = provision(&state, "Owner").await;
        let (member_id, member_token) = provision(&state, "Member").await;

        let (status, group) = send(
            &state,
            Method::POST,
            "/api/groups",
            Some(&owner_token),
            Some(serde_json::json!({ "name": "Team" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let group_id = group["id"].as_str().unwrap().to_string();

        let (status, group) = send(
            &state,
            Method::POST,
            &format!("/api/groups/{group_id}/members"),
            Some(&owner_token),
            Some(serde_json::json!({ "userId": member_id.to_string() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group["members"][1]["canSendMessages"], false);

        let (status, _) = send(
            &state,
            Method::PUT,
            &format!("/api/groups/{group_id}/members/{member_id}"),
            Some(&member_token),
            Some(serde_json::json!({ "canCall": true })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, group) = send(
            &state,
            Method::PUT,
            &format!("/api/groups/{group_id}/members/{member_id}"),
            Some(&owner_token),
            Some(serde_json::json!({ "canCall": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group["members"][1]["canCall"], true);

        let (status, history) = send(
            &state,
            Method::GET,
            &format!("/api/messages/group/{group_id}"),
            Some(&member_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history, serde_json::json!([]));

        let (status, _) = send(
            &state,
            Method::DELETE,
            &format!("/api/groups/{group_id}"),
            Some(&owner_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &state,
            Method::GET,
            &format!("/api/groups/{group_id}"),
            Some(&owner_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_reissues_token() {
        let state = test_state(Some("admin"));
        let (id, _) = provision(&state, "Alice").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/admin/tokens",
            Some("admin"),
            Some(serde_json::json!({ "participantId": id.to_string() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let token = body["token"].as_str().unwrap();
        let (status, me) = send(&state, Method::GET, "/api/me", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["name"], "Alice");
    }
}
