pub mod auth;
pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod rooms;
pub mod ws;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

use auth::Authenticator;
use collab::Neighborhood;

pub use error::{CoreError, CoreResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub registry: ws::ConnectionRegistry,
    pub auth: Arc<dyn Authenticator>,
    pub hood: Arc<dyn Neighborhood>,
}
