//! Appointment lifecycle rules.
//!
//! An appointment is created `pending` by its requester and moved out of
//! `pending` by its approver only. Everything here is pure: persistence,
//! identity and notification are the caller's business.
//!
//! [`EnforcementPolicy::Lenient`] keeps the long-standing API behavior: a
//! transition is accepted whatever the current status is, and a delay may be
//! recorded without a reason or proposed time. [`EnforcementPolicy::Strict`]
//! allows exactly one transition from `pending` and requires the delay payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::appointment::{
    parse_timestamp, Appointment, AppointmentId, AppointmentStatus, AppointmentType,
};
use crate::domain::user::UserId;
use crate::errors::{ApplicationError, DomainError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementPolicy {
    #[default]
    Lenient,
    Strict,
}

impl EnforcementPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lenient => "lenient",
            Self::Strict => "strict",
        }
    }
}

impl std::str::FromStr for EnforcementPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => {
                Err(format!("unsupported workflow enforcement `{other}` (expected lenient|strict)"))
            }
        }
    }
}

/// Raw creation input as received from a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppointmentDraft {
    pub approver_id: Option<String>,
    pub kind: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub note: Option<String>,
}

/// Raw transition input as received from a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TransitionRequest {
    pub status: Option<String>,
    pub delay_reason: Option<String>,
    pub new_time: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub appointment: Appointment,
}

#[derive(Clone, Debug, Default)]
pub struct AppointmentWorkflow {
    policy: EnforcementPolicy,
}

impl AppointmentWorkflow {
    pub fn new(policy: EnforcementPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> EnforcementPolicy {
        self.policy
    }

    /// Builds a new `pending` appointment owned by `requester_id`.
    pub fn create(
        &self,
        requester_id: &UserId,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Appointment, DomainError> {
        let approver_id = non_blank(draft.approver_id);
        let kind = draft.kind.filter(|kind| !kind.trim().is_empty());
        let start_time = non_blank(draft.start_time);
        let end_time = non_blank(draft.end_time);

        let (Some(approver_id), Some(kind), Some(start_time), Some(end_time)) =
            (approver_id, kind, start_time, end_time)
        else {
            return Err(DomainError::Validation(
                "all required fields must be provided".to_string(),
            ));
        };

        let Some(kind) = AppointmentType::parse(&kind) else {
            return Err(DomainError::Validation(format!(
                "unsupported appointment type `{kind}` (expected call|meeting|chat)"
            )));
        };
        let start_time = parse_timestamp("startTime", &start_time)?;
        let end_time = parse_timestamp("endTime", &end_time)?;
        let approver_id = UserId(approver_id);

        if self.policy == EnforcementPolicy::Strict {
            if start_time >= end_time {
                return Err(DomainError::Validation(
                    "end time must be after start time".to_string(),
                ));
            }
            if &approver_id == requester_id {
                return Err(DomainError::Validation(
                    "an appointment cannot be approved by its requester".to_string(),
                ));
            }
        }

        Ok(Appointment {
            id: AppointmentId::generate(),
            requester_id: requester_id.clone(),
            approver_id,
            kind,
            start_time,
            end_time,
            status: AppointmentStatus::Pending,
            note: non_blank(draft.note),
            delay_reason: None,
            new_time: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a status change requested by `caller`.
    ///
    /// Checks run in a fixed order: approver identity, then target status,
    /// then the strict-only invariants.
    pub fn transition(
        &self,
        appointment: &Appointment,
        caller: &UserId,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        if !appointment.is_approver(caller) {
            return Err(ApplicationError::Forbidden(
                "only the designated approver may update this appointment".to_string(),
            ));
        }

        let target = request
            .status
            .as_deref()
            .and_then(AppointmentStatus::parse)
            .filter(AppointmentStatus::is_transition_target)
            .ok_or_else(|| DomainError::Validation("invalid status".to_string()))?;

        let delay_reason = non_blank(request.delay_reason);
        let new_time = non_blank(request.new_time)
            .map(|raw| parse_timestamp("newTime", &raw))
            .transpose()?;

        if self.policy == EnforcementPolicy::Strict {
            if !appointment.can_transition_to(target) {
                return Err(DomainError::InvalidTransition { from: appointment.status, to: target }
                    .into());
            }
            if target == AppointmentStatus::Delayed && (delay_reason.is_none() || new_time.is_none())
            {
                return Err(DomainError::Validation(
                    "delay reason and new time are required".to_string(),
                )
                .into());
            }
        }

        let mut updated = appointment.clone();
        updated.status = target;
        if target == AppointmentStatus::Delayed {
            updated.delay_reason = delay_reason;
            updated.new_time = new_time;
        }
        updated.updated_at = now;

        Ok(TransitionOutcome { from: appointment.status, to: target, appointment: updated })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
