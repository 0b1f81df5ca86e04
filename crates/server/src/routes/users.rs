use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use agenda_core::domain::user::{UserId, UserProfile};

use super::query_rejection;
use crate::auth::AuthUser;
use crate::error::{correlation_id, ApiError};
use crate::state::AppState;

/// Upper bound on ids resolved by one request.
const MAX_IDS: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveUsersQuery {
    pub ids: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/users", get(resolve_users))
}

pub async fn resolve_users(
    State(state): State<AppState>,
    _caller: AuthUser,
    query: Result<Query<ResolveUsersQuery>, QueryRejection>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let correlation_id = correlation_id();
    let Query(query) = query.map_err(|rejection| query_rejection(rejection, &correlation_id))?;

    let ids = parse_ids(query.ids.as_deref().unwrap_or_default());
    if ids.len() > MAX_IDS {
        return Err(ApiError::bad_request(
            format!("at most {MAX_IDS} ids may be resolved at once"),
            &correlation_id,
        ));
    }

    let users = state
        .accounts
        .resolve(&ids, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(Json(users))
}

fn parse_ids(raw: &str) -> Vec<UserId> {
    let mut ids: Vec<UserId> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        let id = UserId(id.to_string());
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
