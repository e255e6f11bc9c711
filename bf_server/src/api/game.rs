//! Game command handlers and derived-view endpoints.

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use serde::{Deserialize, Serialize};

use busfahrer::game::{
    GuessAction,
    entities::Giving,
    models::{HandCard, LaidCard},
    views,
};

use crate::ws::{frames::OutboundFrame, publish_game_leave};

use super::{ApiResult, AppState, AuthUser, MessageResponse};

#[derive(Debug, Deserialize)]
pub struct FlipRowRequest {
    pub idx: u32,
}

pub async fn flip_row(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
    Json(req): Json<FlipRowRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.game.flip_row(&game_id, &user_id, req.idx).await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Deserialize)]
pub struct LayCardRequest {
    pub idx: usize,
}

pub async fn lay_card(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
    Json(req): Json<LayCardRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.game.lay_card(&game_id, &user_id, req.idx).await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardActionRequest {
    /// Target position as `"row-col"`.
    pub card_idx: String,
    pub action: GuessAction,
    pub second_action: Option<GuessAction>,
}

pub async fn card_action(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
    Json(req): Json<CardActionRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .game
        .card_action(&game_id, &user_id, &req.card_idx, req.action, req.second_action)
        .await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiveDrinkRequest {
    pub player_id: String,
    /// `true` assigns a drink, `false` takes one back.
    pub inc: bool,
}

pub async fn give_drink_player(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
    Json(req): Json<GiveDrinkRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .game
        .give_drink(&game_id, &user_id, &req.player_id, req.inc)
        .await?;
    Ok(MessageResponse::ok())
}

pub async fn next_player(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.game.next_player(&game_id, &user_id).await?;
    Ok(MessageResponse::ok())
}

pub async fn retry_phase3(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.game.retry_phase3(&game_id, &user_id).await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGameResponse {
    pub lobby_id: String,
}

pub async fn open_new_game(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<NewGameResponse>> {
    let lobby_id = state.game.open_new_game(&game_id, &user_id).await?;
    state.registry.broadcast_game(
        &game_id,
        OutboundFrame::NewGameUpdate {
            lobby_id: lobby_id.clone(),
        },
    );
    Ok(Json(NewGameResponse { lobby_id }))
}

pub async fn leave_game(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let outcome = state.game.leave_game(&game_id, &user_id).await?;
    publish_game_leave(&state, &game_id, &outcome);
    Ok(MessageResponse::ok())
}

pub async fn get_game_info(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<views::GameInfoView>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(views::game_info(&game)))
}

pub async fn get_player_info(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<Option<views::TurnInfoView>>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(views::turn_info(&game, &user_id)))
}

pub async fn get_drink_info(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<views::DrinkView>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(views::drink_view(&game)))
}

pub async fn get_game_cards(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<Vec<Vec<LaidCard>>>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(game.cards))
}

pub async fn get_player_cards(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<Vec<HandCard>>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(views::player_cards(&game, &user_id)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusfahrerResponse {
    pub busfahrer_name: String,
}

pub async fn get_busfahrer(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<BusfahrerResponse>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(BusfahrerResponse {
        busfahrer_name: views::busfahrer_name(&game),
    }))
}

pub async fn get_game_players(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<Vec<views::AvatarEntry>>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(views::avatar_players(&game)))
}

#[derive(Debug, Serialize)]
pub struct GameSettingsResponse {
    pub giving: Giving,
}

pub async fn get_game_settings(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(game_id): Path<String>,
) -> ApiResult<Json<GameSettingsResponse>> {
    let game = state.game.game_for(&game_id, &user_id).await?;
    Ok(Json(GameSettingsResponse {
        giving: game.settings.giving,
    }))
}
