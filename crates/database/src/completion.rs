//! Per-date completion records.
//!
//! Keyed by the natural (`user_id`, `procedure_id`, `date`) triple. Upserts
//! are idempotent and history is never deleted.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::Completion;
use crate::validation::{format_date, parse_date};

/// Raw completion row as stored.
#[derive(sqlx::FromRow)]
struct CompletionRow {
    user_id: String,
    procedure_id: String,
    date: String,
    completed: bool,
    completed_steps: String,
    updated_at: String,
}

impl CompletionRow {
    fn into_completion(self) -> Result<Completion> {
        let date = parse_date(&self.date)?;
        let completed_steps: Vec<String> = serde_json::from_str(&self.completed_steps)?;
        Ok(Completion {
            user_id: self.user_id,
            procedure_id: self.procedure_id,
            date,
            completed: self.completed,
            completed_steps,
            updated_at: self.updated_at,
        })
    }
}

/// Create or update the completion record for a procedure on a date.
///
/// Repeated calls for the same day overwrite the same row; no duplicates can
/// appear.
pub async fn upsert_completion(
    pool: &SqlitePool,
    user_id: &str,
    procedure_id: &str,
    date: NaiveDate,
    completed: bool,
    completed_steps: &[String],
) -> Result<Completion> {
    let now = Utc::now().to_rfc3339();
    let encoded = serde_json::to_string(completed_steps)?;

    sqlx::query(
        r#"
        INSERT INTO procedure_completions (user_id, procedure_id, date, completed, completed_steps, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, procedure_id, date) DO UPDATE SET
            completed = excluded.completed,
            completed_steps = excluded.completed_steps,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(procedure_id)
    .bind(format_date(date))
    .bind(completed)
    .bind(&encoded)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(Completion {
        user_id: user_id.to_string(),
        procedure_id: procedure_id.to_string(),
        date,
        completed,
        completed_steps: completed_steps.to_vec(),
        updated_at: now,
    })
}

/// Get the completion record for a procedure on a date, if any.
pub async fn get_completion(
    pool: &SqlitePool,
    user_id: &str,
    procedure_id: &str,
    date: NaiveDate,
) -> Result<Option<Completion>> {
    let row = sqlx::query_as::<_, CompletionRow>(
        r#"
        SELECT user_id, procedure_id, date, completed, completed_steps, updated_at
        FROM procedure_completions
        WHERE user_id = ? AND procedure_id = ? AND date = ?
        "#,
    )
    .bind(user_id)
    .bind(procedure_id)
    .bind(format_date(date))
    .fetch_optional(pool)
    .await?;

    row.map(CompletionRow::into_completion).transpose()
}

/// Get all completion records for a date, keyed by procedure id.
pub async fn completions_for_date(
    pool: &SqlitePool,
    user_id: &str,
    date: NaiveDate,
) -> Result<HashMap<String, Completion>> {
    let rows = sqlx::query_as::<_, CompletionRow>(
        r#"
        SELECT user_id, procedure_id, date, completed, completed_steps, updated_at
        FROM procedure_completions
        WHERE user_id = ? AND date = ?
        "#,
    )
    .bind(user_id)
    .bind(format_date(date))
    .fetch_all(pool)
    .await?;

    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let completion = row.into_completion()?;
        map.insert(completion.procedure_id.clone(), completion);
    }

    Ok(map)
}
