//! Chat handlers.

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use serde::Deserialize;

use busfahrer::chat::ChatMessage;

use super::{ApiResult, AppState, AuthUser, MessageResponse};

#[derive(Debug, Deserialize)]
pub struct SendChatMessageRequest {
    pub message: String,
}

pub async fn send_chat_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
    Json(req): Json<SendChatMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.chat.send_message(&user_id, &lobby_id, &req.message).await?;
    Ok(MessageResponse::ok())
}

pub async fn get_chat_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.chat.messages(&user_id, &lobby_id).await?))
}
