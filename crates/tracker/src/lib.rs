//! Per-session state controller for Stepwise.
//!
//! The [`Tracker`] holds one user's procedures, schedules, and the viewed
//! day's completions in memory, applies mutations optimistically, and
//! persists them through the database crate. When the backend is unreachable
//! it degrades to a local [`SnapshotStore`] so the session can still be
//! restored read-only on the next load.
//!
//! # Example
//!
//! ```no_run
//! use stepwise_database::Database;
//! use tracker::{FileSnapshotStore, Tracker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("sqlite:stepwise.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     let snapshots = FileSnapshotStore::new("/var/lib/stepwise/cache");
//!     let tracker = Tracker::new(db, snapshots, "user-1");
//!     tracker.load(chrono::Utc::now().date_naive()).await;
//!
//!     for procedure in tracker.day_view().await {
//!         println!("{}", procedure.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod error;
pub mod snapshot;
pub mod views;

pub use controller::{LoadState, Tracker};
pub use error::TrackerError;
pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, SnapshotStore, PROCEDURES_KEY, SCHEDULES_KEY,
};
