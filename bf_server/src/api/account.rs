//! Account handlers: profile view, titles, and the avatar upload glue.

use axum::{
    Json,
    extract::{Extension, Multipart, State},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use busfahrer::{ServiceError, account::AccountView};

use super::{ApiError, ApiResult, AppState, AuthUser, MessageResponse};

const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
const UPLOAD_TITLE: &str = "Upload Error";

pub async fn get_account_info(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<AccountView>> {
    Ok(Json(state.accounts.account_view(&user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SetTitleRequest {
    pub title: String,
}

pub async fn set_active_title(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SetTitleRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.accounts.set_active_title(&user_id, &req.title).await?;
    Ok(MessageResponse::ok())
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub avatar: String,
}

/// Store an uploaded avatar: validated extension, capped size, previous
/// file removed best-effort.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| {
            ApiError(ServiceError::precondition("No file provided", UPLOAD_TITLE))
        })?;

    let extension = field
        .file_name()
        .and_then(|name| name.rsplit('.').next())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| {
            ApiError(ServiceError::precondition("File has no name", UPLOAD_TITLE))
        })?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError(ServiceError::precondition(
            "Unsupported file type",
            UPLOAD_TITLE,
        )));
    }

    let data = field.bytes().await.map_err(|e| internal(e.to_string()))?;
    if data.len() > state.config.upload.max_bytes {
        return Err(ApiError(ServiceError::precondition(
            "File is too large",
            UPLOAD_TITLE,
        )));
    }

    let file_name = format!("{user_id}-{}.{extension}", Uuid::new_v4().simple());
    let dir = &state.config.upload.dir;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| internal(e.to_string()))?;
    tokio::fs::write(dir.join(&file_name), &data)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let previous = state
        .accounts
        .set_uploaded_avatar(&user_id, &file_name)
        .await?;
    if let Some(previous) = previous
        && let Err(err) = tokio::fs::remove_file(dir.join(&previous)).await
    {
        // Losing the old file is not worth failing the upload over.
        tracing::debug!("could not remove previous avatar {previous}: {err}");
    }

    Ok(Json(UploadResponse { avatar: file_name }))
}

fn internal(message: String) -> ApiError {
    ApiError(ServiceError::internal(message, UPLOAD_TITLE))
}
