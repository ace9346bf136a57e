use axum::{
    routing::{get, post},
    Router,
};
use miniapp_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware, routes, AppState,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    ensure_telegram_webhook().await;

    let public_routes = Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/api/webhook/telegram",
            post(routes::telegram::handle_webhook),
        );

    // Everything behind the Mini-App auth gate lives on this sub-router;
    // health, the bot webhook and static assets stay outside it.
    let webapp_api = Router::new()
        .route("/api/hello", get(routes::api::hello))
        .route("/api/me", get(routes::api::me))
        .layer(axum::middleware::from_fn(
            middleware::auth::require_telegram_auth,
        ));

    info!("Serving static web app from: {}", config.static_dir);
    let static_service =
        ServeDir::new(&config.static_dir).append_index_html_on_directories(true);

    let app = public_routes
        .merge(webapp_api)
        .fallback_service(static_service)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Points the bot's webhook at this deployment if it is not already there.
async fn ensure_telegram_webhook() {
    let config = get_config();
    let bot_token = config.telegram_bot_token.clone();
    let target_webhook_url = format!("{}/api/webhook/telegram", config.webapp_url);

    info!("Checking Telegram webhook status...");

    match reqwest::get(format!(
        "https://api.telegram.org/bot{}/getWebhookInfo",
        bot_token
    ))
    .await
    {
        Ok(resp) => {
            if let Ok(info) = resp.json::<serde_json::Value>().await {
                let current_url = info["result"]["url"].as_str().unwrap_or("");

                if current_url == target_webhook_url {
                    info!("Telegram webhook is already up to date: {}", current_url);
                } else {
                    info!(
                        "Updating Telegram webhook: {} -> {}",
                        current_url, target_webhook_url
                    );
                    let set_url = format!(
                        "https://api.telegram.org/bot{}/setWebhook?url={}",
                        bot_token, target_webhook_url
                    );
                    if let Ok(set_resp) = reqwest::get(&set_url).await {
                        if set_resp.status().is_success() {
                            info!("Telegram webhook registered successfully");
                        } else {
                            tracing::warn!(
                                "Failed to register Telegram webhook: {:?}",
                                set_resp.status()
                            );
                        }
                    }
                }
            }
        }
        Err(e) => tracing::warn!("Could not check Telegram webhook status: {:?}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down server...");
}
