use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use agenda_core::domain::user::{Registration, UserProfile};

use super::json_rejection;
use crate::error::{correlation_id, ApiError};
use crate::service::{LoginRequest, Session};
use crate::state::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserProfile,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            token: session.token,
            expires_at: session.expires_at.to_rfc3339(),
            user: session.user,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/friends", get(friends))
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<Registration>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let correlation_id = correlation_id();
    let Json(registration) = body.map_err(|rejection| json_rejection(rejection, &correlation_id))?;

    let session = state
        .accounts
        .register(registration, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let correlation_id = correlation_id();
    let Json(request) = body.map_err(|rejection| json_rejection(rejection, &correlation_id))?;

    let session = state
        .accounts
        .login(request, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(Json(session.into()))
}

pub async fn friends(State(state): State<AppState>) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let correlation_id = correlation_id();
    let friends = state
        .accounts
        .friends(&correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(Json(friends))
}
