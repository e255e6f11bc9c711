//! Friend graph handlers.

use axum::{
    Json,
    extract::{Extension, State},
};
use serde::Deserialize;

use busfahrer::friend::FriendView;

use super::{ApiResult, AppState, AuthUser, MessageResponse};

/// Friend records are created lazily with the caller's current display
/// name.
async fn ensure_record(state: &AppState, user_id: &str) -> ApiResult<()> {
    let user = state.accounts.ensure_user(user_id).await?;
    state.friends.ensure_record(user_id, &user.name).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendCodeRequest {
    pub friend_code: String,
}

pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<FriendCodeRequest>,
) -> ApiResult<Json<MessageResponse>> {
    ensure_record(&state, &user_id).await?;
    state.friends.send_request(&user_id, &req.friend_code).await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendIdRequest {
    pub friend_id: String,
}

pub async fn accept_friend_request(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<FriendIdRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.friends.accept_request(&user_id, &req.friend_id).await?;
    Ok(MessageResponse::ok())
}

pub async fn decline_friend_request(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<FriendIdRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.friends.decline_request(&user_id, &req.friend_id).await?;
    Ok(MessageResponse::ok())
}

pub async fn remove_friend(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<FriendIdRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.friends.remove_friend(&user_id, &req.friend_id).await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendMessageRequest {
    pub friend_id: String,
    pub message: String,
}

pub async fn send_friend_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<FriendMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .friends
        .send_message(&user_id, &req.friend_id, &req.message)
        .await?;
    Ok(MessageResponse::ok())
}

pub async fn mark_messages_read(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<FriendIdRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .friends
        .mark_messages_read(&user_id, &req.friend_id)
        .await?;
    Ok(MessageResponse::ok())
}

pub async fn get_friend_info(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<FriendView>> {
    let user = state.accounts.ensure_user(&user_id).await?;
    Ok(Json(state.friends.view(&user_id, &user.name).await?))
}
