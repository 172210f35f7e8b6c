//! Session state controller.
//!
//! The tracker owns the in-memory view of one user's procedures, schedules,
//! and the viewed day's completions. UI events mutate that view
//! optimistically, then the change is persisted: completion writes roll back
//! on failure, structural writes are kept and snapshotted to the local
//! fallback store so they survive a reload while the backend is unreachable.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stepwise_database::validation::{validate_step_order, validate_title};
use stepwise_database::{
    completion as completion_store, procedure as procedure_store, schedule as schedule_store,
    Completion, DailySchedule, Database, DatabaseError, NewProcedure, Procedure, Step,
};

use crate::error::TrackerError;
use crate::snapshot::{SnapshotStore, PROCEDURES_KEY, SCHEDULES_KEY};
use crate::views;

/// How the current session state was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Backend reads succeeded.
    Fresh,
    /// Backend reads failed; state was restored from the fallback snapshot.
    Degraded,
    /// Backend reads failed and no snapshot existed.
    Empty,
}

/// In-memory session state for one user and viewing date.
struct SessionState {
    procedures: Vec<Procedure>,
    schedules: Vec<DailySchedule>,
    /// Completion records for the viewing date, keyed by procedure id.
    completions: HashMap<String, Completion>,
    date: NaiveDate,
    load_state: LoadState,
}

/// Per-session state controller.
///
/// Constructed with an injected database handle and snapshot store; nothing
/// here is process-global.
pub struct Tracker<S: SnapshotStore> {
    db: Database,
    snapshots: S,
    user_id: String,
    state: RwLock<SessionState>,
}

impl<S: SnapshotStore> Tracker<S> {
    /// Create a controller for one user. Call [`Tracker::load`] before use.
    pub fn new(db: Database, snapshots: S, user_id: impl Into<String>) -> Self {
        Self {
            db,
            snapshots,
            user_id: user_id.into(),
            state: RwLock::new(SessionState {
                procedures: Vec::new(),
                schedules: Vec::new(),
                completions: HashMap::new(),
                date: Utc::now().date_naive(),
                load_state: LoadState::Empty,
            }),
        }
    }

    /// Load the session state for a viewing date.
    ///
    /// Procedures and schedules are fetched concurrently. If either fetch
    /// fails the fallback snapshots are used instead; no error escapes.
    pub async fn load(&self, date: NaiveDate) -> LoadState {
        let (procedures_result, schedules_result) = tokio::join!(
            procedure_store::list_procedures(self.db.pool(), &self.user_id),
            schedule_store::list_schedules(self.db.pool(), &self.user_id),
        );

        let load_state = match (procedures_result, schedules_result) {
            (Ok(procedures), Ok(schedules)) => {
                let completions = self.fetch_completions(date).await;
                info!(
                    procedures = procedures.len(),
                    schedules = schedules.len(),
                    "Loaded session state"
                );

                let mut state = self.state.write().await;
                state.procedures = procedures;
                state.schedules = schedules;
                state.completions = completions;
                state.date = date;
                state.load_state = LoadState::Fresh;
                LoadState::Fresh
            }
            (procedures_result, schedules_result) => {
                if let Err(err) = procedures_result {
                    warn!("Failed to load procedures: {}", err);
                }
                if let Err(err) = schedules_result {
                    warn!("Failed to load schedules: {}", err);
                }

                let procedures: Vec<Procedure> = self.load_snapshot(PROCEDURES_KEY);
                let schedules: Vec<DailySchedule> = self.load_snapshot(SCHEDULES_KEY);
                let load_state = if procedures.is_empty() && schedules.is_empty() {
                    LoadState::Empty
                } else {
                    LoadState::Degraded
                };
                info!(?load_state, "Falling back to snapshot state");

                let mut state = self.state.write().await;
                state.procedures = procedures;
                state.schedules = schedules;
                state.completions = HashMap::new();
                state.date = date;
                state.load_state = load_state;
                load_state
            }
        };

        load_state
    }

    /// Switch the viewing date, refreshing that day's completions.
    pub async fn set_date(&self, date: NaiveDate) {
        let completions = self.fetch_completions(date).await;
        let mut state = self.state.write().await;
        state.date = date;
        state.completions = completions;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The user this controller belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// All procedures, most recently created first.
    pub async fn procedures(&self) -> Vec<Procedure> {
        self.state.read().await.procedures.clone()
    }

    /// All schedules, ordered by date.
    pub async fn schedules(&self) -> Vec<DailySchedule> {
        self.state.read().await.schedules.clone()
    }

    /// How the current state was obtained.
    pub async fn load_state(&self) -> LoadState {
        self.state.read().await.load_state
    }

    /// The date currently being viewed.
    pub async fn viewing_date(&self) -> NaiveDate {
        self.state.read().await.date
    }

    /// One procedure by id, for the execution view.
    pub async fn procedure(&self, id: &str) -> Result<Procedure, TrackerError> {
        self.state
            .read()
            .await
            .procedures
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownProcedure(id.to_string()))
    }

    /// The viewing date's completion record for a procedure, if any.
    pub async fn completion(&self, procedure_id: &str) -> Option<Completion> {
        self.state.read().await.completions.get(procedure_id).cloned()
    }

    /// Procedures to show for the viewing date: scheduled plus daily,
    /// de-duplicated.
    pub async fn day_view(&self) -> Vec<Procedure> {
        let state = self.state.read().await;
        views::procedures_for_day(&state.procedures, &state.schedules, state.date)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Non-daily procedures not yet scheduled for the viewing date.
    pub async fn available(&self) -> Vec<Procedure> {
        let state = self.state.read().await;
        views::available_procedures(&state.procedures, &state.schedules, state.date)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Progress percentage for a procedure on the viewing date.
    pub async fn progress(&self, procedure_id: &str) -> Result<u8, TrackerError> {
        let state = self.state.read().await;
        let procedure = state
            .procedures
            .iter()
            .find(|p| p.id == procedure_id)
            .ok_or_else(|| TrackerError::UnknownProcedure(procedure_id.to_string()))?;
        Ok(views::progress_percent(
            procedure,
            state.completions.get(procedure_id),
        ))
    }

    // ------------------------------------------------------------------
    // Procedure mutations (keep-and-cache on persistence failure)
    // ------------------------------------------------------------------

    /// Create a procedure.
    ///
    /// A locally identified copy is staged in memory, then either replaced by
    /// the persisted row or kept and snapshotted when the backend is
    /// unreachable.
    pub async fn create_procedure(&self, new: NewProcedure) -> Result<Procedure, TrackerError> {
        validate_title("procedure title", &new.title).map_err(DatabaseError::from)?;
        for step in &new.steps {
            validate_title("step title", &step.title).map_err(DatabaseError::from)?;
        }

        let staged = self.stage_procedure(&new);
        {
            let mut state = self.state.write().await;
            state.procedures.insert(0, staged.clone());
        }

        match procedure_store::create_procedure(self.db.pool(), &new, &self.user_id).await {
            Ok(persisted) => {
                let mut state = self.state.write().await;
                if let Some(slot) = state.procedures.iter_mut().find(|p| p.id == staged.id) {
                    *slot = persisted.clone();
                }
                Ok(persisted)
            }
            Err(err) => {
                warn!("Failed to persist new procedure, keeping local copy: {}", err);
                self.snapshot_procedures().await;
                Ok(staged)
            }
        }
    }

    /// Update a procedure and its steps.
    ///
    /// The optimistic copy is kept even when persistence fails.
    pub async fn update_procedure(&self, procedure: Procedure) -> Result<Procedure, TrackerError> {
        validate_title("procedure title", &procedure.title).map_err(DatabaseError::from)?;
        for step in &procedure.steps {
            validate_title("step title", &step.title).map_err(DatabaseError::from)?;
        }
        let orders: Vec<i64> = procedure.steps.iter().map(|s| s.order).collect();
        validate_step_order(&orders).map_err(DatabaseError::from)?;

        let mut staged = procedure.clone();
        staged.updated_at = Utc::now().to_rfc3339();
        // Unsaved steps get local ids so they stay addressable if the
        // persistence attempt fails.
        for step in staged.steps.iter_mut().filter(|s| s.id.is_empty()) {
            step.id = Uuid::new_v4().to_string();
        }

        {
            let mut state = self.state.write().await;
            let slot = state
                .procedures
                .iter_mut()
                .find(|p| p.id == staged.id)
                .ok_or_else(|| TrackerError::UnknownProcedure(staged.id.clone()))?;
            *slot = staged.clone();
        }

        match procedure_store::update_procedure(self.db.pool(), &procedure).await {
            Ok(persisted) => {
                let mut state = self.state.write().await;
                if let Some(slot) = state.procedures.iter_mut().find(|p| p.id == persisted.id) {
                    *slot = persisted.clone();
                }
                Ok(persisted)
            }
            Err(err) => {
                warn!("Failed to persist procedure update, keeping local copy: {}", err);
                self.snapshot_procedures().await;
                Ok(staged)
            }
        }
    }

    /// Delete a procedure, pruning it from any schedule that holds it.
    pub async fn delete_procedure(&self, id: &str) -> Result<(), TrackerError> {
        let (emptied, shrunk) = {
            let mut state = self.state.write().await;
            let position = state
                .procedures
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| TrackerError::UnknownProcedure(id.to_string()))?;
            state.procedures.remove(position);
            state.completions.remove(id);

            // Schedules hold weak references, so prune explicitly; rows whose
            // set becomes empty are removed outright.
            let mut emptied = Vec::new();
            let mut shrunk = Vec::new();
            state.schedules.retain_mut(|schedule| {
                let Some(i) = schedule.procedure_ids.iter().position(|pid| pid == id) else {
                    return true;
                };
                schedule.procedure_ids.remove(i);
                if schedule.procedure_ids.is_empty() {
                    emptied.push(schedule.clone());
                    false
                } else {
                    shrunk.push(schedule.clone());
                    true
                }
            });
            (emptied, shrunk)
        };

        let mut failed = false;
        if let Err(err) = procedure_store::delete_procedure(self.db.pool(), id).await {
            warn!("Failed to delete procedure {}: {}", id, err);
            failed = true;
        }
        for schedule in &emptied {
            if let Err(err) = schedule_store::delete_schedule(self.db.pool(), &schedule.id).await {
                warn!("Failed to delete emptied schedule {}: {}", schedule.id, err);
                failed = true;
            }
        }
        for schedule in &shrunk {
            if let Err(err) = schedule_store::update_schedule(self.db.pool(), schedule).await {
                warn!("Failed to prune schedule {}: {}", schedule.id, err);
                failed = true;
            }
        }

        if failed {
            self.snapshot_procedures().await;
            self.snapshot_schedules().await;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Schedule mutations (keep-and-cache on persistence failure)
    // ------------------------------------------------------------------

    /// Add a procedure to a date's schedule, find-or-create style.
    ///
    /// Daily procedures are never scheduled (they appear every day anyway)
    /// and repeated adds of the same id are a no-op.
    pub async fn add_to_schedule(
        &self,
        procedure_id: &str,
        date: NaiveDate,
    ) -> Result<(), TrackerError> {
        let staged = {
            let mut state = self.state.write().await;
            let procedure = state
                .procedures
                .iter()
                .find(|p| p.id == procedure_id)
                .ok_or_else(|| TrackerError::UnknownProcedure(procedure_id.to_string()))?;
            if procedure.is_daily {
                debug!("Ignoring schedule add for daily procedure {}", procedure_id);
                return Ok(());
            }

            match state.schedules.iter_mut().find(|s| s.date == date) {
                Some(schedule) => {
                    if schedule.procedure_ids.iter().any(|pid| pid == procedure_id) {
                        return Ok(());
                    }
                    schedule.procedure_ids.push(procedure_id.to_string());
                    schedule.clone()
                }
                None => {
                    let staged = DailySchedule {
                        id: Uuid::new_v4().to_string(),
                        user_id: self.user_id.clone(),
                        date,
                        procedure_ids: vec![procedure_id.to_string()],
                    };
                    state.schedules.push(staged.clone());
                    state.schedules.sort_by_key(|s| s.date);
                    staged
                }
            }
        };

        self.persist_schedule_membership(date, &staged.procedure_ids).await;
        Ok(())
    }

    /// Remove a procedure from a date's schedule.
    ///
    /// Removing the sole member deletes the schedule row; an empty set is
    /// never persisted.
    pub async fn remove_from_schedule(
        &self,
        procedure_id: &str,
        date: NaiveDate,
    ) -> Result<(), TrackerError> {
        let remaining = {
            let mut state = self.state.write().await;
            let Some(position) = state.schedules.iter().position(|s| s.date == date) else {
                return Ok(());
            };
            let schedule = &mut state.schedules[position];
            let Some(i) = schedule.procedure_ids.iter().position(|pid| pid == procedure_id)
            else {
                return Ok(());
            };
            schedule.procedure_ids.remove(i);

            if schedule.procedure_ids.is_empty() {
                state.schedules.remove(position);
                Vec::new()
            } else {
                schedule.procedure_ids.clone()
            }
        };

        self.persist_schedule_membership(date, &remaining).await;
        Ok(())
    }

    /// Persist a date's schedule membership: update the existing row, create
    /// one, or delete it when the set is empty. Failures degrade to the
    /// snapshot store.
    async fn persist_schedule_membership(&self, date: NaiveDate, procedure_ids: &[String]) {
        let result = match schedule_store::get_schedule_for_date(
            self.db.pool(),
            &self.user_id,
            date,
        )
        .await
        {
            Ok(Some(mut row)) => {
                if procedure_ids.is_empty() {
                    schedule_store::delete_schedule(self.db.pool(), &row.id)
                        .await
                        .map(|_| None)
                } else {
                    row.procedure_ids = procedure_ids.to_vec();
                    schedule_store::update_schedule(self.db.pool(), &row)
                        .await
                        .map(|_| Some(row))
                }
            }
            Ok(None) => {
                if procedure_ids.is_empty() {
                    Ok(None)
                } else {
                    schedule_store::create_schedule(
                        self.db.pool(),
                        &self.user_id,
                        date,
                        procedure_ids,
                    )
                    .await
                    .map(Some)
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(Some(row)) => {
                // Sync the backend row id into the in-memory copy.
                let mut state = self.state.write().await;
                if let Some(slot) = state.schedules.iter_mut().find(|s| s.date == date) {
                    *slot = row;
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Failed to persist schedule for {}: {}", date, err);
                self.snapshot_schedules().await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Completion mutations (rollback on persistence failure)
    // ------------------------------------------------------------------

    /// Toggle one step's per-date completion for the viewing date.
    ///
    /// The optimistic change is rolled back if the upsert fails.
    pub async fn toggle_step(&self, procedure_id: &str, step_id: &str) -> Result<(), TrackerError> {
        let (date, staged, prior) = {
            let mut state = self.state.write().await;
            let procedure = state
                .procedures
                .iter()
                .find(|p| p.id == procedure_id)
                .ok_or_else(|| TrackerError::UnknownProcedure(procedure_id.to_string()))?;
            if !procedure.steps.iter().any(|s| s.id == step_id) {
                return Err(TrackerError::UnknownStep(step_id.to_string()));
            }
            let step_ids: Vec<String> = procedure.steps.iter().map(|s| s.id.clone()).collect();

            let prior = state.completions.get(procedure_id).cloned();
            let mut completed_steps = prior
                .as_ref()
                .map(|c| c.completed_steps.clone())
                .unwrap_or_default();
            match completed_steps.iter().position(|sid| sid == step_id) {
                Some(i) => {
                    completed_steps.remove(i);
                }
                None => completed_steps.push(step_id.to_string()),
            }

            let completed =
                !step_ids.is_empty() && step_ids.iter().all(|sid| completed_steps.contains(sid));
            let staged = Completion {
                user_id: self.user_id.clone(),
                procedure_id: procedure_id.to_string(),
                date: state.date,
                completed,
                completed_steps,
                updated_at: Utc::now().to_rfc3339(),
            };
            state
                .completions
                .insert(procedure_id.to_string(), staged.clone());
            (state.date, staged, prior)
        };

        self.persist_completion(procedure_id, date, staged, prior).await;
        Ok(())
    }

    /// Mark a procedure done (or not) for the viewing date.
    ///
    /// Marking done also marks every step done for that date. Rolls back on
    /// persistence failure, like a step toggle.
    pub async fn set_procedure_completed(
        &self,
        procedure_id: &str,
        completed: bool,
    ) -> Result<(), TrackerError> {
        let (date, staged, prior) = {
            let mut state = self.state.write().await;
            let procedure = state
                .procedures
                .iter()
                .find(|p| p.id == procedure_id)
                .ok_or_else(|| TrackerError::UnknownProcedure(procedure_id.to_string()))?;
            let completed_steps = if completed {
                procedure.steps.iter().map(|s| s.id.clone()).collect()
            } else {
                Vec::new()
            };

            let prior = state.completions.get(procedure_id).cloned();
            let staged = Completion {
                user_id: self.user_id.clone(),
                procedure_id: procedure_id.to_string(),
                date: state.date,
                completed,
                completed_steps,
                updated_at: Utc::now().to_rfc3339(),
            };
            state
                .completions
                .insert(procedure_id.to_string(), staged.clone());
            (state.date, staged, prior)
        };

        self.persist_completion(procedure_id, date, staged, prior).await;
        Ok(())
    }

    /// Upsert a staged completion, rolling the in-memory copy back to its
    /// prior value if the write fails.
    async fn persist_completion(
        &self,
        procedure_id: &str,
        date: NaiveDate,
        staged: Completion,
        prior: Option<Completion>,
    ) {
        match completion_store::upsert_completion(
            self.db.pool(),
            &self.user_id,
            procedure_id,
            date,
            staged.completed,
            &staged.completed_steps,
        )
        .await
        {
            Ok(persisted) => {
                let mut state = self.state.write().await;
                state
                    .completions
                    .insert(procedure_id.to_string(), persisted);
            }
            Err(err) => {
                warn!(
                    "Failed to persist completion for {}, rolling back: {}",
                    procedure_id, err
                );
                let mut state = self.state.write().await;
                match prior {
                    Some(prior) => {
                        state.completions.insert(procedure_id.to_string(), prior);
                    }
                    None => {
                        state.completions.remove(procedure_id);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshot helpers
    // ------------------------------------------------------------------

    /// Build the locally identified copy staged before a create commits.
    fn stage_procedure(&self, new: &NewProcedure) -> Procedure {
        let procedure_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        Procedure {
            id: procedure_id.clone(),
            user_id: self.user_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            is_daily: new.is_daily,
            completed: false,
            created_at: now.clone(),
            updated_at: now,
            steps: new
                .steps
                .iter()
                .enumerate()
                .map(|(order, step)| Step {
                    id: Uuid::new_v4().to_string(),
                    procedure_id: procedure_id.clone(),
                    title: step.title.clone(),
                    description: step.description.clone(),
                    order: order as i64,
                    completed: false,
                    media_url: step.media_url.clone(),
                    timer_seconds: step.timer_seconds,
                })
                .collect(),
        }
    }

    /// Read and decode one snapshot key, treating every failure as absence.
    fn load_snapshot<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.snapshots.load(key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(items) => items,
                Err(err) => {
                    warn!("Failed to decode {} snapshot: {}", key, err);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Failed to read {} snapshot: {}", key, err);
                Vec::new()
            }
        }
    }

    async fn snapshot_procedures(&self) {
        let state = self.state.read().await;
        match serde_json::to_vec(&state.procedures) {
            Ok(bytes) => {
                if let Err(err) = self.snapshots.save(PROCEDURES_KEY, &bytes) {
                    warn!("Failed to write procedures snapshot: {}", err);
                }
            }
            Err(err) => warn!("Failed to encode procedures snapshot: {}", err),
        }
    }

    async fn snapshot_schedules(&self) {
        let state = self.state.read().await;
        match serde_json::to_vec(&state.schedules) {
            Ok(bytes) => {
                if let Err(err) = self.snapshots.save(SCHEDULES_KEY, &bytes) {
                    warn!("Failed to write schedules snapshot: {}", err);
                }
            }
            Err(err) => warn!("Failed to encode schedules snapshot: {}", err),
        }
    }

    async fn fetch_completions(&self, date: NaiveDate) -> HashMap<String, Completion> {
        match completion_store::completions_for_date(self.db.pool(), &self.user_id, date).await {
            Ok(map) => map,
            Err(err) => {
                warn!("Failed to load completions for {}: {}", date, err);
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshotStore;
    use stepwise_database::NewStep;

    async fn test_db() -> Database {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1)
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn new_procedure(title: &str, is_daily: bool, steps: &[&str]) -> NewProcedure {
        NewProcedure {
            title: title.to_string(),
            description: String::new(),
            is_daily,
            steps: steps
                .iter()
                .map(|title| NewStep {
                    title: title.to_string(),
                    description: String::new(),
                    media_url: None,
                    timer_seconds: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_commits_persisted_row() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let created = tracker
            .create_procedure(new_procedure("Morning routine", true, &["Stretch"]))
            .await
            .unwrap();

        // In-memory state holds the persisted row, not the staged copy.
        let listed = tracker.procedures().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].steps.len(), 1);

        // And the backend agrees.
        let stored = procedure_store::get_procedure(db.pool(), &created.id)
            .await
            .unwrap();
        assert_eq!(stored.title, "Morning routine");
    }

    #[tokio::test]
    async fn test_create_keeps_local_copy_when_backend_down() {
        let db = test_db().await;
        let snapshots = MemorySnapshotStore::new();
        let tracker = Tracker::new(db.clone(), snapshots.clone(), "user-1");
        tracker.load(date("2024-06-01")).await;

        db.close().await;

        let created = tracker
            .create_procedure(new_procedure("Offline routine", false, &["Only step"]))
            .await
            .unwrap();

        // The optimistic copy survives with local ids.
        let listed = tracker.procedures().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert!(!listed[0].steps[0].id.is_empty());

        // And it was snapshotted for the next load.
        let bytes = snapshots.load(PROCEDURES_KEY).unwrap().unwrap();
        let cached: Vec<Procedure> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].title, "Offline routine");
    }

    #[tokio::test]
    async fn test_create_rejects_empty_title() {
        let db = test_db().await;
        let tracker = Tracker::new(db, MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let result = tracker.create_procedure(new_procedure("   ", false, &[])).await;
        assert!(matches!(
            result,
            Err(TrackerError::Database(DatabaseError::Invalid(_)))
        ));
        assert!(tracker.procedures().await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_adds_share_one_row_per_date() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let a = tracker
            .create_procedure(new_procedure("A", false, &[]))
            .await
            .unwrap();
        let b = tracker
            .create_procedure(new_procedure("B", false, &[]))
            .await
            .unwrap();

        tracker.add_to_schedule(&a.id, date("2024-06-01")).await.unwrap();
        tracker.add_to_schedule(&b.id, date("2024-06-01")).await.unwrap();
        // Repeated add of the same procedure is a no-op.
        tracker.add_to_schedule(&a.id, date("2024-06-01")).await.unwrap();

        let rows = schedule_store::list_schedules(db.pool(), "user-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].procedure_ids, vec![a.id.clone(), b.id.clone()]);

        // Another date gets its own row and is not affected.
        tracker.add_to_schedule(&a.id, date("2024-06-02")).await.unwrap();
        let rows = schedule_store::list_schedules(db.pool(), "user-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].procedure_ids.len(), 2);
        assert_eq!(rows[1].procedure_ids, vec![a.id.clone()]);
    }

    #[tokio::test]
    async fn test_daily_procedures_are_never_scheduled() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let daily = tracker
            .create_procedure(new_procedure("Daily", true, &[]))
            .await
            .unwrap();
        tracker.add_to_schedule(&daily.id, date("2024-06-01")).await.unwrap();

        assert!(tracker.schedules().await.is_empty());
        // It still shows in the day view, by virtue of being daily.
        let day = tracker.day_view().await;
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].id, daily.id);
    }

    #[tokio::test]
    async fn test_removing_last_member_deletes_schedule_row() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let a = tracker
            .create_procedure(new_procedure("A", false, &[]))
            .await
            .unwrap();
        tracker.add_to_schedule(&a.id, date("2024-06-01")).await.unwrap();
        tracker.remove_from_schedule(&a.id, date("2024-06-01")).await.unwrap();

        assert!(tracker.schedules().await.is_empty());
        let rows = schedule_store::list_schedules(db.pool(), "user-1")
            .await
            .unwrap();
        assert!(rows.is_empty());

        // Removing from a date with no schedule is a no-op.
        tracker.remove_from_schedule(&a.id, date("2024-06-01")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_procedure_prunes_schedules() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let a = tracker
            .create_procedure(new_procedure("A", false, &[]))
            .await
            .unwrap();
        let b = tracker
            .create_procedure(new_procedure("B", false, &[]))
            .await
            .unwrap();
        tracker.add_to_schedule(&a.id, date("2024-06-01")).await.unwrap();
        tracker.add_to_schedule(&b.id, date("2024-06-01")).await.unwrap();
        tracker.add_to_schedule(&a.id, date("2024-06-02")).await.unwrap();

        tracker.delete_procedure(&a.id).await.unwrap();

        // The shared row shrinks, the sole-member row disappears.
        let rows = schedule_store::list_schedules(db.pool(), "user-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].procedure_ids, vec![b.id.clone()]);
        assert_eq!(tracker.schedules().await.len(), 1);
        assert_eq!(tracker.procedures().await.len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_step_tracks_per_date_completion() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let p = tracker
            .create_procedure(new_procedure("Routine", true, &["One", "Two"]))
            .await
            .unwrap();
        let first = p.steps[0].id.clone();
        let second = p.steps[1].id.clone();

        tracker.toggle_step(&p.id, &first).await.unwrap();
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 50);
        let completion = tracker.completion(&p.id).await.unwrap();
        assert!(!completion.completed);

        tracker.toggle_step(&p.id, &second).await.unwrap();
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 100);
        assert!(tracker.completion(&p.id).await.unwrap().completed);

        // Toggling back off clears the step and the completed flag.
        tracker.toggle_step(&p.id, &second).await.unwrap();
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 50);
        assert!(!tracker.completion(&p.id).await.unwrap().completed);

        // Another date starts fresh.
        tracker.set_date(date("2024-06-02")).await;
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 0);
        assert!(tracker.completion(&p.id).await.is_none());
    }

    #[tokio::test]
    async fn test_toggle_rolls_back_when_backend_down() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let p = tracker
            .create_procedure(new_procedure("Routine", false, &["One"]))
            .await
            .unwrap();
        let step = p.steps[0].id.clone();

        db.close().await;
        tracker.toggle_step(&p.id, &step).await.unwrap();

        // The optimistic toggle was rolled back.
        assert!(tracker.completion(&p.id).await.is_none());
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_procedure_completed_fills_all_steps() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let p = tracker
            .create_procedure(new_procedure("Routine", false, &["One", "Two", "Three"]))
            .await
            .unwrap();

        tracker.set_procedure_completed(&p.id, true).await.unwrap();
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 100);

        tracker.set_procedure_completed(&p.id, false).await.unwrap();
        assert_eq!(tracker.progress(&p.id).await.unwrap(), 0);
        let completion = tracker.completion(&p.id).await.unwrap();
        assert!(completion.completed_steps.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_unknown_references_are_rejected() {
        let db = test_db().await;
        let tracker = Tracker::new(db.clone(), MemorySnapshotStore::new(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let p = tracker
            .create_procedure(new_procedure("Routine", false, &["One"]))
            .await
            .unwrap();

        let result = tracker.toggle_step("missing", "step").await;
        assert!(matches!(result, Err(TrackerError::UnknownProcedure(_))));

        let result = tracker.toggle_step(&p.id, "missing").await;
        assert!(matches!(result, Err(TrackerError::UnknownStep(_))));
    }

    #[tokio::test]
    async fn test_load_falls_back_to_snapshot() {
        let db = test_db().await;
        let snapshots = MemorySnapshotStore::new();

        // Seed the snapshot as a prior degraded session would have.
        {
            let tracker = Tracker::new(db.clone(), snapshots.clone(), "user-1");
            tracker.load(date("2024-06-01")).await;
            db.close().await;
            tracker
                .create_procedure(new_procedure("Cached routine", true, &[]))
                .await
                .unwrap();
        }

        let tracker = Tracker::new(db, snapshots, "user-1");
        let state = tracker.load(date("2024-06-01")).await;
        assert_eq!(state, LoadState::Degraded);

        let listed = tracker.procedures().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Cached routine");
    }

    #[tokio::test]
    async fn test_load_without_snapshot_is_empty() {
        let db = test_db().await;
        db.close().await;

        let tracker = Tracker::new(db, MemorySnapshotStore::new(), "user-1");
        let state = tracker.load(date("2024-06-01")).await;
        assert_eq!(state, LoadState::Empty);
        assert!(tracker.procedures().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_local_copy_when_backend_down() {
        let db = test_db().await;
        let snapshots = MemorySnapshotStore::new();
        let tracker = Tracker::new(db.clone(), snapshots.clone(), "user-1");
        tracker.load(date("2024-06-01")).await;

        let mut p = tracker
            .create_procedure(new_procedure("Routine", false, &["One"]))
            .await
            .unwrap();

        db.close().await;
        p.title = "Renamed".to_string();
        let updated = tracker.update_procedure(p.clone()).await.unwrap();
        assert_eq!(updated.title, "Renamed");

        assert_eq!(tracker.procedure(&p.id).await.unwrap().title, "Renamed");
        let bytes = snapshots.load(PROCEDURES_KEY).unwrap().unwrap();
        let cached: Vec<Procedure> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cached[0].title, "Renamed");
    }
}
