use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::{Duration, Utc};
use serde_json::json;

use crate::utils::telegram_auth::{self, INIT_DATA_HEADER};

/// Requires a valid `X-Telegram-Init-Data` header on every request passing
/// through. On success the decoded `TelegramUser` is attached to the request
/// extensions for handlers to extract.
///
/// This layer is applied only to the authenticated API sub-router; `/health`,
/// the bot webhook and static assets never pass through it. Every rejection
/// is the same uniform 401 so the response does not reveal which check
/// failed; the specific reason goes to the log.
pub async fn require_telegram_auth(mut req: Request, next: Next) -> Response {
    let config = crate::config::get_config();

    if config.auth_bypass_enabled() {
        tracing::warn!(app_env = %config.app_env, "telegram auth bypass active");
        return next.run(req).await;
    }

    // Guarded at startup; reaching this means the process is misconfigured,
    // which is not an auth failure.
    if config.telegram_bot_token.trim().is_empty() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"server_misconfigured"})),
        )
            .into_response();
    }

    let Some(header) = req.headers().get(INIT_DATA_HEADER) else {
        return unauthorized();
    };
    let Ok(init_data) = header.to_str() else {
        return unauthorized();
    };

    let result = telegram_auth::validate_init_data(
        init_data,
        &config.telegram_bot_token,
        Utc::now(),
        Duration::seconds(config.auth_max_age_secs),
    );

    if !result.valid {
        tracing::debug!(reasons = ?result.errors, "initData rejected");
        return unauthorized();
    }
    let Some(user) = result.user else {
        return unauthorized();
    };

    req.extensions_mut().insert(user);
    next.run(req).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error":"unauthorized"})),
    )
        .into_response()
}
