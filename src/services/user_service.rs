use crate::models::user::User;
use crate::utils::telegram_auth::TelegramUser;
use anyhow::Result;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct UserService {
    pool: SqlitePool,
}

impl UserService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, telegram_id, first_name, last_name, username, language_code, created_at, updated_at
            FROM users
            WHERE telegram_id = ?
            "#,
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Creates the user on first sight, refreshes the profile fields on every
    /// later one. One row per telegram_id.
    pub async fn upsert(&self, tg_user: &TelegramUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (telegram_id, first_name, last_name, username, language_code)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(telegram_id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                username = excluded.username,
                language_code = excluded.language_code,
                updated_at = CURRENT_TIMESTAMP
            RETURNING id, telegram_id, first_name, last_name, username, language_code, created_at, updated_at
            "#,
        )
        .bind(tg_user.id)
        .bind(&tg_user.first_name)
        .bind(&tg_user.last_name)
        .bind(&tg_user.username)
        .bind(&tg_user.language_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }
}
