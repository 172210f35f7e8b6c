//! Procedure CRUD operations.
//!
//! A procedure and its steps are persisted as one logical unit: create and
//! update write the parent row first, then the step rows. The parent/child
//! writes are not wrapped in a transaction, so a failed step write leaves the
//! parent row persisted.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::models::{NewProcedure, Procedure, Step};
use crate::validation::{validate_step_order, validate_title};

/// Raw procedure row as stored.
#[derive(sqlx::FromRow)]
struct ProcedureRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    is_daily: bool,
    completed: bool,
    created_at: String,
    updated_at: String,
}

/// Raw step row as stored.
#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    procedure_id: String,
    title: String,
    description: String,
    order: i64,
    completed: bool,
    media_url: Option<String>,
    timer_seconds: Option<i64>,
}

impl StepRow {
    fn into_step(self) -> Step {
        Step {
            id: self.id,
            procedure_id: self.procedure_id,
            title: self.title,
            description: self.description,
            order: self.order,
            completed: self.completed,
            media_url: self.media_url,
            timer_seconds: self.timer_seconds,
        }
    }
}

impl ProcedureRow {
    fn into_procedure(self, steps: Vec<Step>) -> Procedure {
        Procedure {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            is_daily: self.is_daily,
            completed: self.completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
            steps,
        }
    }
}

/// Create a new procedure with its steps.
///
/// Ids and timestamps are assigned here; step `order` is assigned from array
/// position. Returns the procedure as persisted.
pub async fn create_procedure(
    pool: &SqlitePool,
    new: &NewProcedure,
    user_id: &str,
) -> Result<Procedure> {
    validate_title("procedure title", &new.title)?;
    for step in &new.steps {
        validate_title("step title", &step.title)?;
    }

    let procedure_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO procedures (id, user_id, title, description, is_daily, completed, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&procedure_id)
    .bind(user_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.is_daily)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let mut steps = Vec::with_capacity(new.steps.len());
    for (index, step) in new.steps.iter().enumerate() {
        let step_id = Uuid::new_v4().to_string();
        let order = index as i64;

        sqlx::query(
            r#"
            INSERT INTO procedure_steps (id, procedure_id, title, description, "order", completed, media_url, timer_seconds)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&step_id)
        .bind(&procedure_id)
        .bind(&step.title)
        .bind(&step.description)
        .bind(order)
        .bind(&step.media_url)
        .bind(step.timer_seconds)
        .execute(pool)
        .await?;

        steps.push(Step {
            id: step_id,
            procedure_id: procedure_id.clone(),
            title: step.title.clone(),
            description: step.description.clone(),
            order,
            completed: false,
            media_url: step.media_url.clone(),
            timer_seconds: step.timer_seconds,
        });
    }

    tracing::debug!(procedure_id = %procedure_id, steps = steps.len(), "Created procedure");

    Ok(Procedure {
        id: procedure_id,
        user_id: user_id.to_string(),
        title: new.title.clone(),
        description: new.description.clone(),
        is_daily: new.is_daily,
        completed: false,
        created_at: now.clone(),
        updated_at: now,
        steps,
    })
}

/// Get a procedure with its steps by id.
pub async fn get_procedure(pool: &SqlitePool, id: &str) -> Result<Procedure> {
    let row = sqlx::query_as::<_, ProcedureRow>(
        r#"
        SELECT id, user_id, title, description, is_daily, completed, created_at, updated_at
        FROM procedures
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Procedure",
        id: id.to_string(),
    })?;

    let steps = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT id, procedure_id, title, description, "order", completed, media_url, timer_seconds
        FROM procedure_steps
        WHERE procedure_id = ?
        ORDER BY "order"
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(StepRow::into_step)
    .collect();

    Ok(row.into_procedure(steps))
}

/// List all procedures for a user, most recently created first, with steps
/// attached in execution order.
pub async fn list_procedures(pool: &SqlitePool, user_id: &str) -> Result<Vec<Procedure>> {
    let rows = sqlx::query_as::<_, ProcedureRow>(
        r#"
        SELECT id, user_id, title, description, is_daily, completed, created_at, updated_at
        FROM procedures
        WHERE user_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let step_rows = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT s.id, s.procedure_id, s.title, s.description, s."order", s.completed, s.media_url, s.timer_seconds
        FROM procedure_steps s
        INNER JOIN procedures p ON p.id = s.procedure_id
        WHERE p.user_id = ?
        ORDER BY s."order"
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut steps_by_procedure: HashMap<String, Vec<Step>> = HashMap::new();
    for row in step_rows {
        steps_by_procedure
            .entry(row.procedure_id.clone())
            .or_default()
            .push(row.into_step());
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let steps = steps_by_procedure.remove(&row.id).unwrap_or_default();
            row.into_procedure(steps)
        })
        .collect())
}

/// Update a procedure and reconcile its steps.
///
/// Steps with an empty id are inserted and assigned one; the rest are updated
/// in place. Step rows no longer present in the submitted procedure are
/// deleted. Returns the procedure as persisted.
pub async fn update_procedure(pool: &SqlitePool, procedure: &Procedure) -> Result<Procedure> {
    validate_title("procedure title", &procedure.title)?;
    for step in &procedure.steps {
        validate_title("step title", &step.title)?;
    }
    let orders: Vec<i64> = procedure.steps.iter().map(|s| s.order).collect();
    validate_step_order(&orders)?;

    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE procedures
        SET title = ?, description = ?, is_daily = ?, completed = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&procedure.title)
    .bind(&procedure.description)
    .bind(procedure.is_daily)
    .bind(procedure.completed)
    .bind(&now)
    .bind(&procedure.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Procedure",
            id: procedure.id.clone(),
        });
    }

    let existing_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM procedure_steps WHERE procedure_id = ?
        "#,
    )
    .bind(&procedure.id)
    .fetch_all(pool)
    .await?;

    let mut steps = Vec::with_capacity(procedure.steps.len());
    for step in &procedure.steps {
        if step.id.is_empty() {
            let step_id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO procedure_steps (id, procedure_id, title, description, "order", completed, media_url, timer_seconds)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&step_id)
            .bind(&procedure.id)
            .bind(&step.title)
            .bind(&step.description)
            .bind(step.order)
            .bind(step.completed)
            .bind(&step.media_url)
            .bind(step.timer_seconds)
            .execute(pool)
            .await?;

            steps.push(Step {
                id: step_id,
                procedure_id: procedure.id.clone(),
                ..step.clone()
            });
        } else {
            let result = sqlx::query(
                r#"
                UPDATE procedure_steps
                SET title = ?, description = ?, "order" = ?, completed = ?, media_url = ?, timer_seconds = ?
                WHERE id = ?
                "#,
            )
            .bind(&step.title)
            .bind(&step.description)
            .bind(step.order)
            .bind(step.completed)
            .bind(&step.media_url)
            .bind(step.timer_seconds)
            .bind(&step.id)
            .execute(pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "Step",
                    id: step.id.clone(),
                });
            }

            steps.push(step.clone());
        }
    }

    // Diff-delete step rows removed client-side so they do not linger.
    let kept: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for stale in existing_ids.iter().filter(|id| !kept.contains(id.as_str())) {
        sqlx::query(
            r#"
            DELETE FROM procedure_steps WHERE id = ?
            "#,
        )
        .bind(stale)
        .execute(pool)
        .await?;
    }

    Ok(Procedure {
        updated_at: now,
        steps,
        ..procedure.clone()
    })
}

/// Delete a procedure by id.
///
/// Step and reminder rows go with it via foreign-key cascade. Pruning the id
/// from schedules is the caller's responsibility.
pub async fn delete_procedure(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM procedures
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Procedure",
            id: id.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStep;
    use crate::Database;

    async fn test_db() -> Database {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1)
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn new_procedure(title: &str, is_daily: bool, step_titles: &[&str]) -> NewProcedure {
        NewProcedure {
            title: title.to_string(),
            description: String::new(),
            is_daily,
            steps: step_titles
                .iter()
                .map(|t| NewStep {
                    title: t.to_string(),
                    description: String::new(),
                    media_url: None,
                    timer_seconds: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_and_list_round_trip() {
        let db = test_db().await;

        let created = create_procedure(
            db.pool(),
            &new_procedure("Утренний ритуал", true, &["A", "B"]),
            "user-1",
        )
        .await
        .unwrap();
        assert!(!created.id.is_empty());
        assert!(!created.completed);

        let procedures = list_procedures(db.pool(), "user-1").await.unwrap();
        assert_eq!(procedures.len(), 1);

        let procedure = &procedures[0];
        assert_eq!(procedure.title, "Утренний ритуал");
        assert!(procedure.is_daily);
        assert_eq!(procedure.steps.len(), 2);
        assert_eq!(procedure.steps[0].title, "A");
        assert_eq!(procedure.steps[0].order, 0);
        assert_eq!(procedure.steps[1].title, "B");
        assert_eq!(procedure.steps[1].order, 1);
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first_and_scoped_to_user() {
        let db = test_db().await;

        let first = create_procedure(db.pool(), &new_procedure("First", false, &[]), "user-1")
            .await
            .unwrap();
        // created_at ordering needs distinct timestamps
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = create_procedure(db.pool(), &new_procedure("Second", false, &[]), "user-1")
            .await
            .unwrap();
        create_procedure(db.pool(), &new_procedure("Other", false, &[]), "user-2")
            .await
            .unwrap();

        let procedures = list_procedures(db.pool(), "user-1").await.unwrap();
        assert_eq!(procedures.len(), 2);
        assert_eq!(procedures[0].id, second.id);
        assert_eq!(procedures[1].id, first.id);
    }

    #[tokio::test]
    async fn test_get_procedure_not_found() {
        let db = test_db().await;
        let result = get_procedure(db.pool(), "missing").await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_inserts_new_steps_and_deletes_removed() {
        let db = test_db().await;

        let mut procedure = create_procedure(
            db.pool(),
            &new_procedure("Evening care", false, &["Wash", "Brush", "Floss"]),
            "user-1",
        )
        .await
        .unwrap();

        // Drop the middle step, renumber, and add a new unsaved one at the end.
        procedure.steps.remove(1);
        procedure.steps[1].order = 1;
        procedure.steps.push(Step {
            id: String::new(),
            procedure_id: procedure.id.clone(),
            title: "Moisturize".to_string(),
            description: String::new(),
            order: 2,
            completed: false,
            media_url: None,
            timer_seconds: Some(60),
        });
        procedure.title = "Evening care v2".to_string();

        let updated = update_procedure(db.pool(), &procedure).await.unwrap();
        assert_eq!(updated.steps.len(), 3);
        assert!(updated.steps.iter().all(|s| !s.id.is_empty()));

        let fetched = get_procedure(db.pool(), &procedure.id).await.unwrap();
        assert_eq!(fetched.title, "Evening care v2");
        let titles: Vec<&str> = fetched.steps.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["Wash", "Floss", "Moisturize"]);
        assert_eq!(fetched.steps[2].timer_seconds, Some(60));
    }

    #[tokio::test]
    async fn test_update_rejects_non_contiguous_order() {
        let db = test_db().await;

        let mut procedure = create_procedure(
            db.pool(),
            &new_procedure("Routine", false, &["A", "B"]),
            "user-1",
        )
        .await
        .unwrap();
        procedure.steps[1].order = 5;

        let result = update_procedure(db.pool(), &procedure).await;
        assert!(matches!(result, Err(DatabaseError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_title() {
        let db = test_db().await;
        let result = create_procedure(db.pool(), &new_procedure("  ", false, &[]), "user-1").await;
        assert!(matches!(result, Err(DatabaseError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_steps() {
        let db = test_db().await;

        let procedure = create_procedure(
            db.pool(),
            &new_procedure("Pack for trip", false, &["Tent", "Sleeping bag"]),
            "user-1",
        )
        .await
        .unwrap();

        delete_procedure(db.pool(), &procedure.id).await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM procedure_steps")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);

        let result = delete_procedure(db.pool(), &procedure.id).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }
}
