//! SQLite persistence layer for Stepwise.
//!
//! This crate provides async database operations for procedures, their steps,
//! daily schedules, per-date completions, and reminders using SQLx with
//! SQLite.
//!
//! # Example
//!
//! ```no_run
//! use database::{Database, models::NewProcedure, procedure};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:stepwise.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     // Create a procedure
//!     let new = NewProcedure {
//!         title: "Morning routine".to_string(),
//!         description: String::new(),
//!         is_daily: true,
//!         steps: vec![],
//!     };
//!     let created = procedure::create_procedure(db.pool(), &new, "user-1").await?;
//!     println!("created {}", created.id);
//!
//!     Ok(())
//! }
//! ```

pub mod completion;
pub mod error;
pub mod models;
pub mod procedure;
pub mod reminder;
pub mod schedule;
pub mod validation;

pub use error::{DatabaseError, Result};
pub use models::{
    Completion, DailySchedule, NewProcedure, NewStep, Procedure, Reminder, ReminderKind, Step,
};
pub use validation::ValidationError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size for database connections.
    const DEFAULT_POOL_SIZE: u32 = 10;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `?mode=rwc` to create the database file if it doesn't exist, or
    /// `sqlite::memory:` for tests.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!("Connected to database: {} (pool size: {})", url, pool_size);

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// This should be called once after connecting to ensure the schema is up
    /// to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProcedure, NewStep};

    async fn test_db() -> Database {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1)
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_procedure_crud() {
        let db = test_db().await;

        // Create
        let new = NewProcedure {
            title: "Evening care".to_string(),
            description: "Wind-down checklist".to_string(),
            is_daily: false,
            steps: vec![NewStep {
                title: "Brush teeth".to_string(),
                description: String::new(),
                media_url: None,
                timer_seconds: Some(120),
            }],
        };
        let created = procedure::create_procedure(db.pool(), &new, "user-1")
            .await
            .unwrap();

        // Read
        let fetched = procedure::get_procedure(db.pool(), &created.id).await.unwrap();
        assert_eq!(fetched.title, "Evening care");
        assert_eq!(fetched.steps.len(), 1);
        assert_eq!(fetched.steps[0].timer_seconds, Some(120));

        // Update
        let mut updated = fetched.clone();
        updated.description = "Updated".to_string();
        procedure::update_procedure(db.pool(), &updated).await.unwrap();
        let fetched = procedure::get_procedure(db.pool(), &created.id).await.unwrap();
        assert_eq!(fetched.description, "Updated");

        // List
        let procedures = procedure::list_procedures(db.pool(), "user-1").await.unwrap();
        assert_eq!(procedures.len(), 1);

        // Delete
        procedure::delete_procedure(db.pool(), &created.id).await.unwrap();
        let result = procedure::get_procedure(db.pool(), &created.id).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }
}
