use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agenda_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, AppointmentType,
};
use agenda_core::workflow::{AppointmentDraft, TransitionRequest};

use super::json_rejection;
use crate::auth::AuthUser;
use crate::error::{correlation_id, ApiError};
use crate::state::AppState;

/// Creation body. A `requesterId` sent by the client is ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentBody {
    pub approver_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub note: Option<String>,
}

impl From<CreateAppointmentBody> for AppointmentDraft {
    fn from(body: CreateAppointmentBody) -> Self {
        Self {
            approver_id: body.approver_id,
            kind: body.kind,
            start_time: body.start_time,
            end_time: body.end_time,
            note: body.note,
        }
    }
}

/// Status change body. Read loosely so that lookup and approver checks run
/// before any payload problem is reported: a body that is not a JSON object,
/// or a field that is not a string, counts as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionBody {
    pub status: Option<String>,
    pub delay_reason: Option<String>,
    pub new_time: Option<String>,
}

impl TransitionBody {
    pub fn from_bytes(raw: &[u8]) -> Self {
        let value = serde_json::from_slice::<Value>(raw).unwrap_or(Value::Null);
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            status: field("status"),
            delay_reason: field("delayReason"),
            new_time: field("newTime"),
        }
    }
}

impl From<TransitionBody> for TransitionRequest {
    fn from(body: TransitionBody) -> Self {
        Self { status: body.status, delay_reason: body.delay_reason, new_time: body.new_time }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: String,
    pub requester_id: String,
    pub approver_id: String,
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub note: Option<String>,
    pub delay_reason: Option<String>,
    pub new_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Appointment> for AppointmentView {
    fn from(appointment: Appointment) -> Self {
        Self {
            id: appointment.id.0,
            requester_id: appointment.requester_id.0,
            approver_id: appointment.approver_id.0,
            kind: appointment.kind,
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            status: appointment.status,
            note: appointment.note,
            delay_reason: appointment.delay_reason,
            new_time: appointment.new_time,
            created_at: appointment.created_at,
            updated_at: appointment.updated_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/{id}", patch(update_appointment_status))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    body: Result<Json<CreateAppointmentBody>, JsonRejection>,
) -> Result<(StatusCode, Json<AppointmentView>), ApiError> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|rejection| json_rejection(rejection, &correlation_id))?;

    let appointment = state
        .appointments
        .create(&requester, body.into(), &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok((StatusCode::CREATED, Json(appointment.into())))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<AppointmentView>>, ApiError> {
    let correlation_id = correlation_id();
    let appointments = state
        .appointments
        .list_for(&caller, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(Json(appointments.into_iter().map(AppointmentView::from).collect()))
}

pub async fn update_appointment_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<AppointmentView>, ApiError> {
    let correlation_id = correlation_id();
    let body = TransitionBody::from_bytes(&body);

    let appointment = state
        .appointments
        .transition(&AppointmentId(id), &caller, body.into(), &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(Json(appointment.into()))
}
