//! Derived views over the session state.
//!
//! These are computed on demand and never stored: the day view, the list of
//! procedures still available to schedule, and progress percentages.

use std::collections::HashSet;

use chrono::NaiveDate;
use stepwise_database::{Completion, DailySchedule, Procedure};

/// Procedures to show for a given day: those referenced by the day's schedule
/// plus every daily procedure, de-duplicated by id.
pub fn procedures_for_day<'a>(
    procedures: &'a [Procedure],
    schedules: &[DailySchedule],
    date: NaiveDate,
) -> Vec<&'a Procedure> {
    let scheduled_ids: Vec<&str> = schedules
        .iter()
        .filter(|s| s.date == date)
        .flat_map(|s| s.procedure_ids.iter().map(String::as_str))
        .collect();

    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for id in scheduled_ids {
        if let Some(procedure) = procedures.iter().find(|p| p.id == id) {
            if seen.insert(procedure.id.as_str()) {
                result.push(procedure);
            }
        }
    }

    for procedure in procedures.iter().filter(|p| p.is_daily) {
        if seen.insert(procedure.id.as_str()) {
            result.push(procedure);
        }
    }

    result
}

/// Non-daily procedures not yet scheduled for the given day.
///
/// Daily procedures are excluded since they always appear in the day view.
pub fn available_procedures<'a>(
    procedures: &'a [Procedure],
    schedules: &[DailySchedule],
    date: NaiveDate,
) -> Vec<&'a Procedure> {
    let scheduled_ids: HashSet<&str> = schedules
        .iter()
        .filter(|s| s.date == date)
        .flat_map(|s| s.procedure_ids.iter().map(String::as_str))
        .collect();

    procedures
        .iter()
        .filter(|p| !p.is_daily && !scheduled_ids.contains(p.id.as_str()))
        .collect()
}

/// Progress percentage for a procedure on a date, round-half-up.
///
/// Counts the completion record's step ids against the procedure's own steps;
/// a zero-step procedure is 0%.
pub fn progress_percent(procedure: &Procedure, completion: Option<&Completion>) -> u8 {
    let total = procedure.steps.len();
    if total == 0 {
        return 0;
    }

    let done = match completion {
        Some(completion) => procedure
            .steps
            .iter()
            .filter(|step| completion.completed_steps.contains(&step.id))
            .count(),
        None => 0,
    };

    (100.0 * done as f64 / total as f64).round() as u8
}
