use std::sync::Arc;

use crate::service::{AccountService, AppointmentService};

#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub appointments: Arc<AppointmentService>,
}

impl AppState {
    pub fn new(accounts: AccountService, appointments: AppointmentService) -> Self {
        Self { accounts: Arc::new(accounts), appointments: Arc::new(appointments) }
    }
}
