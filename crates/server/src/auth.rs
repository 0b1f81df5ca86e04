use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use agenda_core::domain::user::UserId;

use crate::error::{correlation_id, ApiError};
use crate::state::AppState;

/// The caller behind a valid `Authorization: Bearer <token>` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id();
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token", &correlation_id))?;

        state.accounts.authenticate(token).map(AuthUser).map_err(|error| {
            tracing::debug!(
                event_name = "http.auth.rejected",
                correlation_id = %correlation_id,
                error = %error,
                "bearer token rejected"
            );
            ApiError::unauthorized("invalid or expired token", &correlation_id)
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
