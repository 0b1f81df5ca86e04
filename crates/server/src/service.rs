//! Orchestration between the workflow rules, the repositories and the
//! outbound event publisher. Handlers stay thin and call into these.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use tracing::{error, info};

use agenda_core::credentials::{PasswordHasher, TokenSigner};
use agenda_core::domain::appointment::{Appointment, AppointmentId};
use agenda_core::domain::user::{Registration, User, UserId, UserProfile, UserRole};
use agenda_core::errors::{ApplicationError, DomainError};
use agenda_core::events::{AppointmentEvent, EventPublisher};
use agenda_core::workflow::{AppointmentDraft, AppointmentWorkflow, TransitionRequest};
use agenda_db::repositories::{AppointmentRepository, RepositoryError, UserRepository};

/// Stored timestamps keep millisecond precision; so do freshly minted ones.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn persistence(error: RepositoryError, correlation_id: &str) -> ApplicationError {
    error!(
        event_name = "repository.failure",
        correlation_id = %correlation_id,
        error = %error,
        "repository operation failed"
    );
    ApplicationError::Persistence(error.to_string())
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    tokens: TokenSigner,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: PasswordHasher,
        tokens: TokenSigner,
    ) -> Self {
        Self { users, hasher, tokens }
    }

    pub async fn register(
        &self,
        registration: Registration,
        correlation_id: &str,
    ) -> Result<Session, ApplicationError> {
        let valid = registration.validate()?;

        let existing = self
            .users
            .find_by_email(&valid.email)
            .await
            .map_err(|error| persistence(error, correlation_id))?;
        if existing.is_some() {
            return Err(DomainError::Validation("user already exists".to_string()).into());
        }

        let created_at = now();
        let user = User {
            id: UserId::generate(),
            name: valid.name,
            email: valid.email,
            password_hash: self.hasher.hash(&valid.password),
            role: valid.role,
            created_at,
            updated_at: created_at,
        };

        match self.users.save(user.clone()).await {
            Ok(()) => {}
            // Lost a race with a concurrent registration for the same address.
            Err(RepositoryError::Conflict(_)) => {
                return Err(DomainError::Validation("user already exists".to_string()).into());
            }
            Err(error) => return Err(persistence(error, correlation_id)),
        }

        info!(
            event_name = "account.registered",
            correlation_id = %correlation_id,
            user_id = %user.id,
            role = user.role.as_str(),
            "user registered"
        );
        Ok(self.session_for(&user))
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        correlation_id: &str,
    ) -> Result<Session, ApplicationError> {
        let email = request.email.filter(|value| !value.trim().is_empty());
        let password = request.password.filter(|value| !value.is_empty());
        let (Some(email), Some(password)) = (email, password) else {
            return Err(
                DomainError::Validation("email and password are required".to_string()).into()
            );
        };

        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(|error| persistence(error, correlation_id))?;

        let Some(user) = user.filter(|user| self.hasher.verify(&password, &user.password_hash))
        else {
            info!(
                event_name = "account.login_rejected",
                correlation_id = %correlation_id,
                "login rejected"
            );
            return Err(ApplicationError::Unauthenticated("invalid credentials".to_string()));
        };

        info!(
            event_name = "account.logged_in",
            correlation_id = %correlation_id,
            user_id = %user.id,
            "user logged in"
        );
        Ok(self.session_for(&user))
    }

    /// Accounts offered as approvers.
    pub async fn friends(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<UserProfile>, ApplicationError> {
        let friends = self
            .users
            .list_by_role(UserRole::Friend)
            .await
            .map_err(|error| persistence(error, correlation_id))?;
        Ok(friends.iter().map(UserProfile::from).collect())
    }

    pub async fn resolve(
        &self,
        ids: &[UserId],
        correlation_id: &str,
    ) -> Result<Vec<UserProfile>, ApplicationError> {
        let users =
            self.users.find_many(ids).await.map_err(|error| persistence(error, correlation_id))?;
        Ok(users.iter().map(UserProfile::from).collect())
    }

    pub fn authenticate(&self, token: &str) -> Result<UserId, ApplicationError> {
        self.tokens
            .verify(token, Utc::now())
            .map_err(|error| ApplicationError::Unauthenticated(error.to_string()))
    }

    fn session_for(&self, user: &User) -> Session {
        let issued = self.tokens.issue(&user.id, Utc::now());
        Session {
            token: issued.token,
            expires_at: issued.expires_at,
            user: UserProfile::from(user),
        }
    }
}

pub struct AppointmentService {
    appointments: Arc<dyn AppointmentRepository>,
    workflow: AppointmentWorkflow,
    publisher: Arc<dyn EventPublisher>,
}

impl AppointmentService {
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        workflow: AppointmentWorkflow,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { appointments, workflow, publisher }
    }

    pub fn workflow(&self) -> &AppointmentWorkflow {
        &self.workflow
    }

    pub async fn create(
        &self,
        requester_id: &UserId,
        draft: AppointmentDraft,
        correlation_id: &str,
    ) -> Result<Appointment, ApplicationError> {
        let appointment = self.workflow.create(requester_id, draft, now())?;
        self.appointments
            .save(appointment.clone())
            .await
            .map_err(|error| persistence(error, correlation_id))?;

        info!(
            event_name = "appointment.created",
            correlation_id = %correlation_id,
            appointment_id = %appointment.id,
            user_id = %requester_id,
            approver_id = %appointment.approver_id,
            appointment_type = appointment.kind.as_str(),
            "appointment created"
        );

        self.publisher.publish(AppointmentEvent::Created {
            appointment_id: appointment.id.clone(),
            requester_id: appointment.requester_id.clone(),
            approver_id: appointment.approver_id.clone(),
            appointment_type: appointment.kind,
            start_time: appointment.start_time,
            note: appointment.note.clone(),
        });

        Ok(appointment)
    }

    pub async fn list_for(
        &self,
        user_id: &UserId,
        correlation_id: &str,
    ) -> Result<Vec<Appointment>, ApplicationError> {
        self.appointments
            .list_for_user(user_id)
            .await
            .map_err(|error| persistence(error, correlation_id))
    }

    pub async fn transition(
        &self,
        appointment_id: &AppointmentId,
        caller: &UserId,
        request: TransitionRequest,
        correlation_id: &str,
    ) -> Result<Appointment, ApplicationError> {
        let current = self
            .appointments
            .find_by_id(appointment_id)
            .await
            .map_err(|error| persistence(error, correlation_id))?
            .ok_or_else(|| ApplicationError::NotFound("appointment not found".to_string()))?;

        let outcome = match self.workflow.transition(&current, caller, request, now()) {
            Ok(outcome) => outcome,
            Err(error) => {
                info!(
                    event_name = "appointment.transition_refused",
                    correlation_id = %correlation_id,
                    appointment_id = %appointment_id,
                    user_id = %caller,
                    error = %error,
                    "appointment transition refused"
                );
                return Err(error);
            }
        };

        self.appointments
            .save(outcome.appointment.clone())
            .await
            .map_err(|error| persistence(error, correlation_id))?;

        info!(
            event_name = "appointment.transitioned",
            correlation_id = %correlation_id,
            appointment_id = %appointment_id,
            user_id = %caller,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            policy = self.workflow.policy().as_str(),
            "appointment status changed"
        );

        let updated = outcome.appointment;
        self.publisher.publish(AppointmentEvent::Transitioned {
            appointment_id: updated.id.clone(),
            requester_id: updated.requester_id.clone(),
            status: updated.status,
            delay_reason: updated.delay_reason.clone(),
            new_time: updated.new_time,
        });

        Ok(updated)
    }
}
