//! Daily schedule CRUD operations.
//!
//! A schedule row is the set of non-daily procedure ids assigned to one
//! calendar date. The (`user_id`, `date`) pair is unique; find-or-create and
//! empty-set deletion live in the controller, this module only moves rows.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::models::DailySchedule;
use crate::validation::{format_date, parse_date};

/// Raw schedule row as stored; `procedure_ids` is a JSON-encoded array and
/// `date` a normalized `YYYY-MM-DD` string.
#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    user_id: String,
    date: String,
    procedure_ids: String,
}

impl ScheduleRow {
    fn into_schedule(self) -> Result<DailySchedule> {
        let date = parse_date(&self.date)?;
        let procedure_ids: Vec<String> = serde_json::from_str(&self.procedure_ids)?;
        Ok(DailySchedule {
            id: self.id,
            user_id: self.user_id,
            date,
            procedure_ids,
        })
    }
}

/// List all schedules for a user, ordered by date.
pub async fn list_schedules(pool: &SqlitePool, user_id: &str) -> Result<Vec<DailySchedule>> {
    let rows = sqlx::query_as::<_, ScheduleRow>(
        r#"
        SELECT id, user_id, date, procedure_ids
        FROM daily_schedules
        WHERE user_id = ?
        ORDER BY date
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ScheduleRow::into_schedule).collect()
}

/// Get the schedule for a specific date, if one exists.
///
/// At most one row can match thanks to the (`user_id`, `date`) uniqueness.
pub async fn get_schedule_for_date(
    pool: &SqlitePool,
    user_id: &str,
    date: NaiveDate,
) -> Result<Option<DailySchedule>> {
    let row = sqlx::query_as::<_, ScheduleRow>(
        r#"
        SELECT id, user_id, date, procedure_ids
        FROM daily_schedules
        WHERE user_id = ? AND date = ?
        "#,
    )
    .bind(user_id)
    .bind(format_date(date))
    .fetch_optional(pool)
    .await?;

    row.map(ScheduleRow::into_schedule).transpose()
}

/// Create a schedule row for a date.
///
/// Fails with `AlreadyExists` if the user already has a schedule for that
/// date; callers are expected to find-or-create.
pub async fn create_schedule(
    pool: &SqlitePool,
    user_id: &str,
    date: NaiveDate,
    procedure_ids: &[String],
) -> Result<DailySchedule> {
    let id = Uuid::new_v4().to_string();
    let date_str = format_date(date);
    let encoded = serde_json::to_string(procedure_ids)?;

    sqlx::query(
        r#"
        INSERT INTO daily_schedules (id, user_id, date, procedure_ids)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(&date_str)
    .bind(&encoded)
    .execute(pool)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return DatabaseError::AlreadyExists {
                    entity: "DailySchedule",
                    id: format!("{}/{}", user_id, date_str),
                };
            }
        }
        DatabaseError::Sqlx(e)
    })?;

    Ok(DailySchedule {
        id,
        user_id: user_id.to_string(),
        date,
        procedure_ids: procedure_ids.to_vec(),
    })
}

/// Update a schedule's date and membership.
pub async fn update_schedule(pool: &SqlitePool, schedule: &DailySchedule) -> Result<()> {
    let encoded = serde_json::to_string(&schedule.procedure_ids)?;
    let result = sqlx::query(
        r#"
        UPDATE daily_schedules
        SET date = ?, procedure_ids = ?
        WHERE id = ?
        "#,
    )
    .bind(format_date(schedule.date))
    .bind(&encoded)
    .bind(&schedule.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "DailySchedule",
            id: schedule.id.clone(),
        });
    }

    Ok(())
}

/// Delete a schedule row by id.
pub async fn delete_schedule(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM daily_schedules
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "DailySchedule",
            id: id.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn test_db() -> Database {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1)
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_list_ordered_by_date() {
        let db = test_db().await;

        create_schedule(db.pool(), "user-1", date("2024-06-02"), &["p2".to_string()])
            .await
            .unwrap();
        create_schedule(db.pool(), "user-1", date("2024-06-01"), &["p1".to_string()])
            .await
            .unwrap();

        let schedules = list_schedules(db.pool(), "user-1").await.unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].date, date("2024-06-01"));
        assert_eq!(schedules[1].date, date("2024-06-02"));
    }

    #[tokio::test]
    async fn test_one_row_per_user_and_date() {
        let db = test_db().await;

        create_schedule(db.pool(), "user-1", date("2024-06-01"), &["p1".to_string()])
            .await
            .unwrap();

        let result =
            create_schedule(db.pool(), "user-1", date("2024-06-01"), &["p2".to_string()]).await;
        assert!(matches!(result, Err(DatabaseError::AlreadyExists { .. })));

        // A different user may hold the same date.
        create_schedule(db.pool(), "user-2", date("2024-06-01"), &["p3".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_schedule_for_date() {
        let db = test_db().await;

        let created =
            create_schedule(db.pool(), "user-1", date("2024-06-01"), &["p1".to_string()])
                .await
                .unwrap();

        let found = get_schedule_for_date(db.pool(), "user-1", date("2024-06-01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, created);

        let missing = get_schedule_for_date(db.pool(), "user-1", date("2024-06-02"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_membership() {
        let db = test_db().await;

        let mut schedule =
            create_schedule(db.pool(), "user-1", date("2024-06-01"), &["p1".to_string()])
                .await
                .unwrap();

        schedule.procedure_ids.push("p2".to_string());
        update_schedule(db.pool(), &schedule).await.unwrap();

        let found = get_schedule_for_date(db.pool(), "user-1", date("2024-06-01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.procedure_ids, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_schedule() {
        let db = test_db().await;

        let schedule =
            create_schedule(db.pool(), "user-1", date("2024-06-01"), &["p1".to_string()])
                .await
                .unwrap();

        delete_schedule(db.pool(), &schedule.id).await.unwrap();

        let schedules = list_schedules(db.pool(), "user-1").await.unwrap();
        assert!(schedules.is_empty());

        let result = delete_schedule(db.pool(), &schedule.id).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }
}
