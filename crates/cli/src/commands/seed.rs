use agenda_core::credentials::PasswordHasher;
use agenda_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, AppointmentType,
};
use agenda_core::domain::user::{User, UserId, UserRole};
use agenda_db::{
    connect_with_settings, migrations, AppointmentRepository, DbPool, RepositoryError,
    SqlAppointmentRepository, SqlUserRepository, UserRepository,
};
use chrono::{TimeZone, Utc};

use crate::commands::{prepare, CommandResult};

pub const DEMO_PASSWORD: &str = "agenda-demo";
pub const DEMO_APPOINTMENT_ID: &str = "seed-meeting-0001";

struct DemoAccount {
    name: &'static str,
    email: &'static str,
    role: UserRole,
}

const DEMO_ACCOUNTS: [DemoAccount; 2] = [
    DemoAccount { name: "Ava Requester", email: "ava@example.com", role: UserRole::User },
    DemoAccount { name: "Ben Approver", email: "ben@example.com", role: UserRole::Friend },
];

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let hasher = PasswordHasher::new(config.auth.password_hash_rounds);

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = load_demo_data(&pool, &hasher)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8));

        pool.close().await;
        seeded
    });

    match result {
        Ok(()) => CommandResult::success(
            "seed",
            format!(
                "demo data ready: ava@example.com (user) and ben@example.com (friend) \
                 with password `{DEMO_PASSWORD}`; appointment {DEMO_APPOINTMENT_ID} awaits \
                 ben's decision"
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

/// Inserts whatever is missing and leaves existing rows untouched, so a
/// re-run never resets passwords or appointment status.
async fn load_demo_data(pool: &DbPool, hasher: &PasswordHasher) -> Result<(), RepositoryError> {
    let users = SqlUserRepository::new(pool.clone());
    let appointments = SqlAppointmentRepository::new(pool.clone());
    let now = Utc::now();

    let mut ids = Vec::with_capacity(DEMO_ACCOUNTS.len());
    for account in &DEMO_ACCOUNTS {
        if let Some(existing) = users.find_by_email(account.email).await? {
            ids.push(existing.id);
            continue;
        }
        let user = User {
            id: UserId::generate(),
            name: account.name.to_string(),
            email: account.email.to_string(),
            password_hash: hasher.hash(DEMO_PASSWORD),
            role: account.role,
            created_at: now,
            updated_at: now,
        };
        ids.push(user.id.clone());
        users.save(user).await?;
    }

    let appointment_id = AppointmentId(DEMO_APPOINTMENT_ID.to_string());
    if appointments.find_by_id(&appointment_id).await?.is_some() {
        return Ok(());
    }
    let (Some(requester_id), Some(approver_id)) = (ids.first(), ids.get(1)) else {
        return Err(RepositoryError::Decode("demo accounts missing after insert".to_string()));
    };
    let start_time = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).single().unwrap_or(now);
    appointments
        .save(Appointment {
            id: appointment_id,
            requester_id: requester_id.clone(),
            approver_id: approver_id.clone(),
            kind: AppointmentType::Meeting,
            start_time,
            end_time: start_time + chrono::Duration::hours(1),
            status: AppointmentStatus::Pending,
            note: Some("Quarterly planning".to_string()),
            delay_reason: None,
            new_time: None,
            created_at: now,
            updated_at: now,
        })
        .await
}
