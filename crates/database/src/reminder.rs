//! Reminder CRUD operations.
//!
//! Reminders are notification slots for procedures; actually delivering them
//! is an external concern.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::models::{Reminder, ReminderKind};
use crate::validation::validate_time_of_day;

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: String,
    user_id: String,
    procedure_id: String,
    time_of_day: String,
    kind: String,
    enabled: bool,
}

impl ReminderRow {
    fn into_reminder(self) -> Reminder {
        Reminder {
            id: self.id,
            user_id: self.user_id,
            procedure_id: self.procedure_id,
            time_of_day: self.time_of_day,
            kind: ReminderKind::from_str(&self.kind),
            enabled: self.enabled,
        }
    }
}

/// Create a reminder for a procedure.
pub async fn create_reminder(
    pool: &SqlitePool,
    user_id: &str,
    procedure_id: &str,
    time_of_day: &str,
    kind: ReminderKind,
) -> Result<Reminder> {
    validate_time_of_day(time_of_day)?;

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO reminders (id, user_id, procedure_id, time_of_day, kind, enabled)
        VALUES (?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(procedure_id)
    .bind(time_of_day)
    .bind(kind.as_str())
    .execute(pool)
    .await?;

    Ok(Reminder {
        id,
        user_id: user_id.to_string(),
        procedure_id: procedure_id.to_string(),
        time_of_day: time_of_day.to_string(),
        kind,
        enabled: true,
    })
}

/// List all reminders for a user, earliest time of day first.
pub async fn list_reminders(pool: &SqlitePool, user_id: &str) -> Result<Vec<Reminder>> {
    let rows = sqlx::query_as::<_, ReminderRow>(
        r#"
        SELECT id, user_id, procedure_id, time_of_day, kind, enabled
        FROM reminders
        WHERE user_id = ?
        ORDER BY time_of_day
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ReminderRow::into_reminder).collect())
}

/// Enable or disable a reminder.
pub async fn set_reminder_enabled(pool: &SqlitePool, id: &str, enabled: bool) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE reminders
        SET enabled = ?
        WHERE id = ?
        "#,
    )
    .bind(enabled)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Reminder",
            id: id.to_string(),
        });
    }

    Ok(())
}

/// Delete a reminder by id.
pub async fn delete_reminder(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM reminders
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Reminder",
            id: id.to_string(),
        });
    }

    Ok(())
}
