//! HTTP/WebSocket API for the Busfahrer server.
//!
//! Command endpoints translate JSON requests into service calls; every
//! error response carries `{error, title}` for the client toast. The
//! gateway middleware stops unauthenticated requests with 401 and invalid
//! tokens with 403; realtime updates flow over the `/ws` endpoint.

pub mod account;
pub mod chat;
pub mod friend;
pub mod game;
pub mod lobby;
pub mod middleware;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use busfahrer::{
    ServiceError, Store,
    account::AccountService,
    chat::ChatService,
    friend::FriendService,
    game::GameService,
    lobby::LobbyService,
};

use crate::{
    auth::TokenManager,
    config::ServerConfig,
    ws::{self, cleanup::CleanupScheduler, registry::ConnectionRegistry},
};

/// Application state shared across all HTTP handlers and WebSocket
/// connections; cloning is cheap (everything is behind an Arc).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub accounts: Arc<AccountService>,
    pub friends: Arc<FriendService>,
    pub lobby: Arc<LobbyService>,
    pub chat: Arc<ChatService>,
    pub game: Arc<GameService>,
    pub tokens: Arc<TokenManager>,
    pub registry: Arc<ConnectionRegistry>,
    pub cleanup: Arc<CleanupScheduler>,
    pub config: Arc<ServerConfig>,
}

/// The authenticated caller, injected by the middleware.
#[derive(Clone, Debug)]
pub struct AuthUser(pub String);

/// Service errors rendered as `{error, title}` with the mapped status.
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {}", self.0);
        }
        let body = json!({
            "error": self.0.to_string(),
            "title": self.0.title(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn ok() -> Json<Self> {
        Json(Self {
            message: "ok".to_string(),
        })
    }
}

/// Create the complete router: public health/ws plus the authenticated
/// command surface.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        // The WebSocket upgrade validates the token cookie itself.
        .route("/ws", get(ws::websocket_handler));

    let protected_routes = Router::new()
        // Lobby
        .route("/create-lobby", post(lobby::create_lobby))
        .route("/check-lobby-code", post(lobby::check_lobby_code))
        .route("/join-lobby/{lobby_id}", post(lobby::join_lobby))
        .route("/leave-join/{lobby_id}", post(lobby::leave_join))
        .route("/leave-lobby/{lobby_id}", post(lobby::leave_lobby))
        .route("/kick-lobby-player/{lobby_id}", post(lobby::kick_player))
        .route("/start-game/{lobby_id}", post(lobby::start_game))
        .route("/invite-to-lobby/{lobby_id}", post(lobby::invite_to_lobby))
        .route(
            "/accept-invitation/{lobby_id}",
            post(lobby::accept_invitation),
        )
        .route(
            "/decline-invitation/{lobby_id}",
            post(lobby::decline_invitation),
        )
        .route("/get-lobbies", get(lobby::get_lobbies))
        .route("/get-lobby-info/{lobby_id}", get(lobby::get_lobby_info))
        .route("/is-lobby-master/{lobby_id}", get(lobby::is_lobby_master))
        // Game
        .route("/flip-row/{game_id}", post(game::flip_row))
        .route("/lay-card/{game_id}", post(game::lay_card))
        .route("/card-action/{game_id}", post(game::card_action))
        .route("/give-drink-player/{game_id}", post(game::give_drink_player))
        .route("/next-player/{game_id}", post(game::next_player))
        .route("/retry-phase3/{game_id}", post(game::retry_phase3))
        .route("/open-new-game/{game_id}", post(game::open_new_game))
        .route("/leave-game/{game_id}", post(game::leave_game))
        .route("/get-game-info/{game_id}", get(game::get_game_info))
        .route("/get-player-info/{game_id}", get(game::get_player_info))
        .route("/get-drink-info/{game_id}", get(game::get_drink_info))
        .route("/get-game-cards/{game_id}", get(game::get_game_cards))
        .route("/get-player-cards/{game_id}", get(game::get_player_cards))
        .route("/get-busfahrer/{game_id}", get(game::get_busfahrer))
        .route("/get-game-players/{game_id}", get(game::get_game_players))
        .route("/get-game-settings/{game_id}", get(game::get_game_settings))
        // Chat
        .route("/send-chat-message/{lobby_id}", post(chat::send_chat_message))
        .route("/get-chat-messages/{lobby_id}", get(chat::get_chat_messages))
        // Friends
        .route("/send-friend-request", post(friend::send_friend_request))
        .route("/accept-friend-request", post(friend::accept_friend_request))
        .route(
            "/decline-friend-request",
            post(friend::decline_friend_request),
        )
        .route("/remove-friend", post(friend::remove_friend))
        .route("/send-friend-message", post(friend::send_friend_message))
        .route("/mark-messages-read", post(friend::mark_messages_read))
        .route("/get-friend-info", get(friend::get_friend_info))
        // Account
        .route("/get-account-info", get(account::get_account_info))
        .route("/set-active-title", post(account::set_active_title))
        .route("/upload-avatar", post(account::upload_avatar))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint for monitoring.
async fn health_check() -> impl IntoResponse {
    let response = json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (StatusCode::OK, Json(response))
}
