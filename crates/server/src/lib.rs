pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod health;
pub mod notify;
pub mod routes;
pub mod service;
pub mod state;

use axum::Router;

use agenda_db::DbPool;

use crate::state::AppState;

/// The full HTTP surface: API routes plus `/health`.
pub fn app(state: AppState, db_pool: DbPool) -> Router {
    routes::router(state).merge(health::router(db_pool))
}
