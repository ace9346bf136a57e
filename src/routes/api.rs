use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde_json::json;

use crate::error::Result;
use crate::utils::telegram_auth::TelegramUser;
use crate::AppState;

#[axum::debug_handler]
pub async fn hello() -> impl IntoResponse {
    Json(json!({ "message": "Hello from miniapp-backend!" }))
}

/// Returns the caller's profile, creating or refreshing the database row from
/// the identity the auth middleware attached to the request.
#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(tg_user): Extension<TelegramUser>,
) -> Result<impl IntoResponse> {
    let user = state.user_service.upsert(&tg_user).await?;
    Ok(Json(user))
}
