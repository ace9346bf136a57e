use axum::{extract::State, Json};
use serde::Deserialize;

use crate::error::Result;
use crate::utils::telegram_auth::TelegramUser;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: TelegramUser,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    pub r#type: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(update): Json<TelegramUpdate>,
) -> Result<impl axum::response::IntoResponse> {
    tracing::info!("Received Telegram webhook update ID: {}", update.update_id);

    if let Some(callback) = update.callback_query {
        if callback.data.as_deref() == Some("open_webapp") {
            answer_callback_query(&callback.id, "Opening WebApp...").await?;
            if let Some(message) = callback.message {
                let config = crate::config::get_config();
                let text = format!("Click to open: {}", config.webapp_url);
                send_telegram_message(message.chat.id, &text, None).await?;
            }
        }
        return Ok(axum::http::StatusCode::OK);
    }

    if let Some(message) = update.message {
        if let Some(text) = &message.text {
            let chat_id = message.chat.id;

            if text.starts_with("/start") {
                tracing::info!(
                    "Handling /start from user: {} (id: {})",
                    message.from.first_name,
                    message.from.id
                );

                if let Err(e) = state.user_service.upsert(&message.from).await {
                    tracing::warn!("Failed to upsert user from /start: {:?}", e);
                }

                let config = crate::config::get_config();
                let reply_markup = start_reply_markup(&config.webapp_url);
                send_telegram_message(
                    chat_id,
                    "Welcome! Click the button below to open the WebApp:",
                    Some(reply_markup),
                )
                .await?;
            } else {
                let echo = format!("You said: {}", text);
                let _ = send_telegram_message(chat_id, &echo, None).await;
            }
        }
    }

    Ok(axum::http::StatusCode::OK)
}

fn start_reply_markup(webapp_url: &str) -> serde_json::Value {
    serde_json::json!({
        "inline_keyboard": [[
            {
                "text": "Open WebApp",
                "web_app": { "url": webapp_url }
            }
        ]]
    })
}

async fn send_telegram_message(
    chat_id: i64,
    text: &str,
    reply_markup: Option<serde_json::Value>,
) -> Result<()> {
    let config = crate::config::get_config();
    let url = format!(
        "https://api.telegram.org/bot{}/sendMessage",
        config.telegram_bot_token
    );

    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });
    if let Some(markup) = reply_markup {
        body["reply_markup"] = markup;
    }

    let client = reqwest::Client::new();
    let response = client.post(&url).json(&body).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let response_text = response.text().await.unwrap_or_default();
        tracing::warn!("Telegram sendMessage failed: {} - {}", status, response_text);
    }
    Ok(())
}

async fn answer_callback_query(callback_query_id: &str, text: &str) -> Result<()> {
    let config = crate::config::get_config();
    let url = format!(
        "https://api.telegram.org/bot{}/answerCallbackQuery",
        config.telegram_bot_token
    );
    let body = serde_json::json!({
        "callback_query_id": callback_query_id,
        "text": text,
    });

    let client = reqwest::Client::new();
    let response = client.post(&url).json(&body).send().await?;
    if !response.status().is_success() {
        tracing::warn!("Telegram answerCallbackQuery failed: {}", response.status());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_markup_opens_webapp_button() {
        let markup = start_reply_markup("https://app.example.com");
        let button = &markup["inline_keyboard"][0][0];
        assert_eq!(button["text"], "Open WebApp");
        assert_eq!(button["web_app"]["url"], "https://app.example.com");
    }

    #[test]
    fn update_with_callback_query_deserializes() {
        let raw = serde_json::json!({
            "update_id": 10,
            "callback_query": {
                "id": "77",
                "from": { "id": 42, "first_name": "Ann" },
                "data": "open_webapp"
            }
        });
        let update: TelegramUpdate = serde_json::from_value(raw).unwrap();
        let callback = update.callback_query.unwrap();
        assert_eq!(callback.data.as_deref(), Some("open_webapp"));
        assert_eq!(callback.from.id, 42);
    }
}
