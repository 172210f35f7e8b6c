//! Domain models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A named, ordered checklist of steps, optionally recurring daily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Backend-assigned UUID (or locally generated while offline).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Non-empty title.
    pub title: String,
    /// Free-form description, possibly empty.
    pub description: String,
    /// Daily procedures are included in every day's view unconditionally.
    pub is_daily: bool,
    /// Lifetime completion flag, distinct from per-date completions.
    pub completed: bool,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Last update timestamp (RFC 3339).
    pub updated_at: String,
    /// Owned steps, ordered by `order`.
    pub steps: Vec<Step>,
}

/// One actionable item within a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Backend-assigned UUID. Empty for steps not yet persisted.
    pub id: String,
    /// Owning procedure.
    pub procedure_id: String,
    /// Non-empty title.
    pub title: String,
    /// Free-form description, possibly empty.
    pub description: String,
    /// Zero-based execution position, contiguous at persistence time.
    pub order: i64,
    /// Lifetime completion flag.
    pub completed: bool,
    /// Optional instructional media.
    pub media_url: Option<String>,
    /// Optional countdown timer in seconds.
    pub timer_seconds: Option<i64>,
}

/// The set of non-daily procedures assigned to one calendar date.
///
/// Holds weak references (ids) to procedures, never the procedures themselves.
/// At most one row exists per (`user_id`, `date`), and an empty set is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySchedule {
    /// Backend-assigned UUID.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Calendar day; time of day is irrelevant.
    pub date: NaiveDate,
    /// Ids of the procedures scheduled for this date.
    pub procedure_ids: Vec<String>,
}

/// Per-date execution record for a procedure.
///
/// Keyed by (`user_id`, `procedure_id`, `date`). Lets a daily procedure be
/// done on one day and pending the next without touching its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Owning user.
    pub user_id: String,
    /// The procedure this record tracks.
    pub procedure_id: String,
    /// Calendar day of execution.
    pub date: NaiveDate,
    /// Whether the whole procedure was marked done that day.
    pub completed: bool,
    /// Ids of the steps completed that day.
    pub completed_steps: Vec<String>,
    /// Last update timestamp (RFC 3339).
    pub updated_at: String,
}

/// A scheduled notification slot for a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Backend-assigned UUID.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// The procedure to be reminded about.
    pub procedure_id: String,
    /// Time of day in `HH:MM` (24-hour).
    pub time_of_day: String,
    /// Reminder slot kind.
    pub kind: ReminderKind,
    /// Whether the reminder fires. Delivery itself is external.
    pub enabled: bool,
}

/// Reminder slot kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    /// Start-of-day reminder.
    Morning,
    /// End-of-day reminder.
    Evening,
    /// User-defined slot.
    Custom,
}

impl ReminderKind {
    /// Get the stored column value for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::Morning => "morning",
            ReminderKind::Evening => "evening",
            ReminderKind::Custom => "custom",
        }
    }

    /// Parse a stored column value. Unknown values default to `Custom`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "morning" => ReminderKind::Morning,
            "evening" => ReminderKind::Evening,
            _ => ReminderKind::Custom,
        }
    }
}

/// Input shape for creating a procedure; ids and timestamps are assigned by
/// the data access layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProcedure {
    /// Non-empty title.
    pub title: String,
    /// Free-form description, possibly empty.
    #[serde(default)]
    pub description: String,
    /// Whether the procedure recurs daily.
    #[serde(default)]
    pub is_daily: bool,
    /// Steps in execution order; `order` is assigned from position.
    #[serde(default)]
    pub steps: Vec<NewStep>,
}

/// Input shape for one step of a new procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStep {
    /// Non-empty title.
    pub title: String,
    /// Free-form description, possibly empty.
    #[serde(default)]
    pub description: String,
    /// Optional instructional media.
    #[serde(default)]
    pub media_url: Option<String>,
    /// Optional countdown timer in seconds.
    #[serde(default)]
    pub timer_seconds: Option<i64>,
}
