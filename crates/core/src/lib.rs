pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod events;
pub mod workflow;

pub use credentials::{CredentialError, IssuedToken, PasswordHasher, TokenSigner};
pub use domain::appointment::{Appointment, AppointmentId, AppointmentStatus, AppointmentType};
pub use domain::user::{Registration, User, UserId, UserProfile, UserRole};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use events::{AppointmentEvent, EventPublisher, InMemoryEventPublisher};
pub use workflow::{
    AppointmentDraft, AppointmentWorkflow, EnforcementPolicy, TransitionOutcome, TransitionRequest,
};
