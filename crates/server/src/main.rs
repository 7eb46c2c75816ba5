use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use grace_group::{Assigner, GraceGroupSettings};
use serde::{Deserialize, Serialize};
use shared::{
    domain::GroupId,
    error::{ApiError, ErrorCode},
    events::{LoginContext, LoginDispatcher},
    protocol::{GroupSummary, MemberSummary, ServerEvent},
};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    storage: Storage,
    dispatcher: Arc<LoginDispatcher>,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginResponse {
    user_id: i64,
    first_login: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let (events, _) = broadcast::channel(256);

    let assigner = Assigner::new(
        GraceGroupSettings {
            enabled: settings.grace_group_enabled,
            target_group_id: settings.grace_group_id,
        },
        Arc::new(storage.clone()),
        events.clone(),
    );
    let mut dispatcher = LoginDispatcher::new();
    dispatcher.register(Arc::new(assigner));

    let state = AppState {
        storage,
        dispatcher: Arc::new(dispatcher),
        events,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/groups", get(http_list_groups))
        .route("/groups/:group_id/members", get(http_list_members))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Records the visit, fires the typed login events, and answers with the
/// resolved user. Whatever the login listeners decide (or fail at) stays on
/// their side of the dispatcher; it never turns a login into an error.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "username cannot be empty",
            )),
        ));
    }

    let user_id = state
        .storage
        .create_user(username)
        .await
        .map_err(internal)?;
    let first_login = state
        .storage
        .record_first_seen(user_id, Utc::now())
        .await
        .map_err(internal)?;
    let profile = state
        .storage
        .user_profile(user_id)
        .await
        .map_err(internal)?;

    let ctx = LoginContext::default();
    state.dispatcher.user_logged_in(profile.as_ref(), &ctx).await;
    if first_login {
        state.dispatcher.user_first_logged_in(profile.as_ref()).await;
    }

    Ok(Json(LoginResponse {
        user_id: user_id.0,
        first_login,
    }))
}

async fn http_list_groups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<GroupSummary>>, (StatusCode, Json<ApiError>)> {
    let groups = state.storage.list_groups().await.map_err(internal)?;
    Ok(Json(groups))
}

async fn http_list_members(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
) -> Result<Json<Vec<MemberSummary>>, (StatusCode, Json<ApiError>)> {
    let group = state
        .storage
        .find_group(GroupId(group_id))
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError::new(ErrorCode::NotFound, "group not found")),
            )
        })?;

    let members = state
        .storage
        .list_group_members(group.group_id)
        .await
        .map_err(internal)?;
    Ok(Json(members))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

fn internal(err: anyhow::Error) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new(ErrorCode::Internal, err.to_string())),
    )
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
