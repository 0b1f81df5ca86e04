use std::collections::HashMap;

use tokio::sync::RwLock;

use agenda_core::domain::appointment::{Appointment, AppointmentId};
use agenda_core::domain::user::{normalize_email, User, UserId, UserRole};

use super::{AppointmentRepository, RepositoryError, UserRepository};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let email = normalize_email(email);
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(&id.0).cloned()).collect())
    }

    async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut matching: Vec<User> =
            users.values().filter(|user| user.role == role).cloned().collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(matching)
    }

    async fn save(&self, mut user: User) -> Result<(), RepositoryError> {
        user.email = normalize_email(&user.email);
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email && existing.id != user.id) {
            return Err(RepositoryError::Conflict(format!(
                "email `{}` is already registered",
                user.email
            )));
        }
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    appointments: RwLock<HashMap<String, Appointment>>,
}

#[async_trait::async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn find_by_id(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        Ok(appointments.get(&id.0).cloned())
    }

    async fn save(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.id.0.clone(), appointment);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut matching: Vec<Appointment> = appointments
            .values()
            .filter(|appointment| appointment.involves(user_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.start_time.cmp(&a.start_time).then(b.created_at.cmp(&a.created_at))
        });
        Ok(matching)
    }
}
