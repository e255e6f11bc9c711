//! Lobby command handlers.

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use serde::{Deserialize, Serialize};

use busfahrer::{
    game::entities::Gender,
    lobby::{CreateLobby, models::{LobbyPlayer, LobbySettings, LobbyStatus, LobbySummary}},
};

use crate::ws::{frames::OutboundFrame, publish_lobby_leave};

use super::{ApiResult, AppState, AuthUser, MessageResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyRequest {
    pub name: String,
    pub player_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub settings: LobbySettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyIdResponse {
    pub lobby_id: String,
}

pub async fn create_lobby(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateLobbyRequest>,
) -> ApiResult<Json<LobbyIdResponse>> {
    // A user document guarantees the lobby entry carries a profile.
    state.accounts.ensure_user(&user_id).await?;
    let lobby_id = state
        .lobby
        .create(
            &user_id,
            CreateLobby {
                name: req.name,
                player_name: req.player_name,
                private: req.private,
                gender: req.gender,
                settings: req.settings,
            },
        )
        .await?;
    Ok(Json(LobbyIdResponse { lobby_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckLobbyCodeRequest {
    pub lobby_code: String,
}

pub async fn check_lobby_code(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CheckLobbyCodeRequest>,
) -> ApiResult<Json<LobbyIdResponse>> {
    let lobby_id = state.lobby.authenticate(&user_id, &req.lobby_code).await?;
    Ok(Json(LobbyIdResponse { lobby_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyRequest {
    pub player_name: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub spectator: bool,
}

pub async fn join_lobby(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
    Json(req): Json<JoinLobbyRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.accounts.ensure_user(&user_id).await?;
    state
        .lobby
        .join(&user_id, &lobby_id, &req.player_name, req.gender, req.spectator)
        .await?;
    Ok(MessageResponse::ok())
}

pub async fn leave_join(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.lobby.leave_join(&user_id, &lobby_id).await?;
    Ok(MessageResponse::ok())
}

pub async fn leave_lobby(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let outcome = state.lobby.leave_lobby(&user_id, &lobby_id).await?;
    publish_lobby_leave(&state, &lobby_id, &outcome);
    Ok(MessageResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickRequest {
    pub player_id: String,
}

pub async fn kick_player(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
    Json(req): Json<KickRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let kicked = state.lobby.kick(&lobby_id, &user_id, &req.player_id).await?;
    state
        .registry
        .send_lobby_user(&lobby_id, &kicked, OutboundFrame::KickUpdate);
    Ok(MessageResponse::ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameResponse {
    pub game_id: String,
}

pub async fn start_game(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<StartGameResponse>> {
    let game_id = state.lobby.start(&lobby_id, &user_id).await?;
    state.registry.broadcast_lobby(
        &lobby_id,
        OutboundFrame::StartUpdate {
            game_id: game_id.clone(),
        },
    );
    Ok(Json(StartGameResponse { game_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub friend_id: String,
}

pub async fn invite_to_lobby(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.lobby.invite(&user_id, &req.friend_id, &lobby_id).await?;
    Ok(MessageResponse::ok())
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<LobbyIdResponse>> {
    let lobby_id = state.lobby.accept_invitation(&user_id, &lobby_id).await?;
    Ok(Json(LobbyIdResponse { lobby_id }))
}

pub async fn decline_invitation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.lobby.decline_invitation(&user_id, &lobby_id).await?;
    Ok(MessageResponse::ok())
}

pub async fn get_lobbies(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LobbySummary>>> {
    Ok(Json(state.lobby.public_lobbies().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyInfoResponse {
    pub name: String,
    pub lobby_code: String,
    pub status: LobbyStatus,
    pub players: Vec<LobbyPlayer>,
    pub spectators: Vec<LobbyPlayer>,
    pub settings: LobbySettings,
}

pub async fn get_lobby_info(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<LobbyInfoResponse>> {
    let lobby = state.lobby.lobby_info(&lobby_id).await?;
    Ok(Json(LobbyInfoResponse {
        name: lobby.name,
        lobby_code: lobby.lobby_code,
        status: lobby.status,
        players: lobby.players,
        spectators: lobby.spectators,
        settings: lobby.settings,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IsMasterResponse {
    pub is_master: bool,
}

pub async fn is_lobby_master(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<IsMasterResponse>> {
    let is_master = state.lobby.is_master(&user_id, &lobby_id).await?;
    Ok(Json(IsMasterResponse { is_master }))
}
