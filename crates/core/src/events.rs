use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::appointment::{AppointmentId, AppointmentStatus, AppointmentType};
use crate::domain::user::UserId;

/// Outbound facts emitted after an appointment write has been persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppointmentEvent {
    Created {
        appointment_id: AppointmentId,
        requester_id: UserId,
        approver_id: UserId,
        appointment_type: AppointmentType,
        start_time: DateTime<Utc>,
        note: Option<String>,
    },
    Transitioned {
        appointment_id: AppointmentId,
        requester_id: UserId,
        status: AppointmentStatus,
        delay_reason: Option<String>,
        new_time: Option<DateTime<Utc>>,
    },
}

impl AppointmentEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "appointment.created",
            Self::Transitioned { .. } => "appointment.transitioned",
        }
    }

    pub fn appointment_id(&self) -> &AppointmentId {
        match self {
            Self::Created { appointment_id, .. } | Self::Transitioned { appointment_id, .. } => {
                appointment_id
            }
        }
    }

    /// The party who should hear about this event.
    pub fn recipient(&self) -> &UserId {
        match self {
            Self::Created { approver_id, .. } => approver_id,
            Self::Transitioned { requester_id, .. } => requester_id,
        }
    }
}

/// Hands events to whatever delivers them. Must not block and must not fail
/// the caller; delivery problems belong to the publisher.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AppointmentEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<AppointmentEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn events(&self) -> Vec<AppointmentEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: AppointmentEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
