use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::state::AppState;

pub mod appointments;
pub mod auth;
pub mod users;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(appointments::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub(crate) fn json_rejection(rejection: JsonRejection, correlation_id: &str) -> ApiError {
    let message = format!("invalid request body: {}", rejection.body_text());
    ApiError::bad_request(message, correlation_id)
}

pub(crate) fn query_rejection(rejection: QueryRejection, correlation_id: &str) -> ApiError {
    let message = format!("invalid query string: {}", rejection.body_text());
    ApiError::bad_request(message, correlation_id)
}
