use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub telegram_bot_token: String,
    pub webapp_url: String,
    pub app_env: String,
    pub auth_max_age_secs: i64,
    pub auth_dev_bypass: bool,
    pub static_dir: String,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let config = Self {
            server_address: get_env_or("SERVER_ADDRESS", "0.0.0.0:8080"),
            database_url: get_env_or("DATABASE_URL", "sqlite:data.db?mode=rwc"),
            telegram_bot_token: get_env("TELEGRAM_BOT_TOKEN")?,
            webapp_url: get_env("WEBAPP_URL")?,
            app_env: get_env_or("APP_ENV", "production"),
            auth_max_age_secs: get_env_parse_or(
                "AUTH_MAX_AGE_SECS",
                crate::utils::telegram_auth::DEFAULT_MAX_AGE_SECS,
            )?,
            auth_dev_bypass: get_env_parse_or("AUTH_DEV_BYPASS", false)?,
            static_dir: get_env_or("STATIC_DIR", "web"),
        };

        // Validating signatures against an empty secret would accept forged
        // payloads; refuse to start instead.
        if config.telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN must not be empty".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// The development auth bypass is opt-in and never honored in production.
    pub fn auth_bypass_enabled(&self) -> bool {
        self.auth_dev_bypass && !self.is_production()
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
