pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::user_service::UserService;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub user_service: UserService,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        let user_service = UserService::new(pool.clone());
        Self { pool, user_service }
    }
}
