use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use agenda_core::domain::appointment::{Appointment, AppointmentId};
use agenda_core::domain::user::{User, UserId, UserRole};

pub mod appointment;
pub mod memory;
pub mod user;

pub use appointment::SqlAppointmentRepository;
pub use memory::{InMemoryAppointmentRepository, InMemoryUserRepository};
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    /// `email` is matched after normalization (trimmed, lower-cased).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// Unknown ids are skipped; result order is unspecified.
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;
    async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>, RepositoryError>;
    /// Upserts by id. An email already owned by another user is a `Conflict`.
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AppointmentId)
        -> Result<Option<Appointment>, RepositoryError>;
    async fn save(&self, appointment: Appointment) -> Result<(), RepositoryError>;
    /// Appointments where the user is requester or approver, newest start first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Appointment>, RepositoryError>;
}

pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}
