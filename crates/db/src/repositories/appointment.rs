use sqlx::Row;

use agenda_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, AppointmentType,
};
use agenda_core::domain::user::UserId;

use super::{decode_timestamp, encode_timestamp, AppointmentRepository, RepositoryError};
use crate::DbPool;

const APPOINTMENT_COLUMNS: &str = "id, requester_id, approver_id, appointment_type, start_time,
     end_time, status, note, delay_reason, new_time, created_at, updated_at";

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_appointment(row: &sqlx::sqlite::SqliteRow) -> Result<Appointment, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requester_id: String =
        row.try_get("requester_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_id: String =
        row.try_get("approver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let kind: String =
        row.try_get("appointment_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let start_time: String =
        row.try_get("start_time").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let end_time: String =
        row.try_get("end_time").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let note: Option<String> =
        row.try_get("note").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delay_reason: Option<String> =
        row.try_get("delay_reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let new_time: Option<String> =
        row.try_get("new_time").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let kind = AppointmentType::parse(&kind)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown appointment type `{kind}`")))?;
    let status = AppointmentStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown appointment status `{status}`")))?;

    Ok(Appointment {
        id: AppointmentId(id),
        requester_id: UserId(requester_id),
        approver_id: UserId(approver_id),
        kind,
        start_time: decode_timestamp("start_time", &start_time)?,
        end_time: decode_timestamp("end_time", &end_time)?,
        status,
        note,
        delay_reason,
        new_time: new_time.map(|raw| decode_timestamp("new_time", &raw)).transpose()?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn find_by_id(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_appointment).transpose()
    }

    async fn save(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO appointment (id, requester_id, approver_id, appointment_type, start_time,
                                      end_time, status, note, delay_reason, new_time,
                                      created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 appointment_type = excluded.appointment_type,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 status = excluded.status,
                 note = excluded.note,
                 delay_reason = excluded.delay_reason,
                 new_time = excluded.new_time,
                 updated_at = excluded.updated_at",
        )
        .bind(&appointment.id.0)
        .bind(&appointment.requester_id.0)
        .bind(&appointment.approver_id.0)
        .bind(appointment.kind.as_str())
        .bind(encode_timestamp(&appointment.start_time))
        .bind(encode_timestamp(&appointment.end_time))
        .bind(appointment.status.as_str())
        .bind(&appointment.note)
        .bind(&appointment.delay_reason)
        .bind(appointment.new_time.as_ref().map(encode_timestamp))
        .bind(encode_timestamp(&appointment.created_at))
        .bind(encode_timestamp(&appointment.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment
             WHERE requester_id = ? OR approver_id = ?
             ORDER BY start_time DESC, created_at DESC"
        ))
        .bind(&user_id.0)
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_appointment).collect()
    }
}
