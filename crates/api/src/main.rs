use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use stepwise_database::{
    reminder, Completion, Database, DatabaseError, NewProcedure, Procedure, Reminder, ReminderKind,
};
use tracker::{FileSnapshotStore, Tracker, TrackerError};

/// One lazily created controller per user, keyed by the `X-User-Id` header.
type Sessions = Arc<RwLock<HashMap<String, Arc<Tracker<FileSnapshotStore>>>>>;

#[derive(Clone)]
struct AppState {
    db: Database,
    cache_dir: PathBuf,
    sessions: Sessions,
}

#[derive(Debug, Serialize)]
struct Health {
    status: String,
}

#[derive(Debug, Serialize)]
struct DayEntry {
    #[serde(flatten)]
    procedure: Procedure,
    progress: u8,
    completion: Option<Completion>,
}

#[derive(Debug, Serialize)]
struct DayView {
    date: NaiveDate,
    load_state: String,
    procedures: Vec<DayEntry>,
    available: Vec<Procedure>,
}

#[derive(Debug, Deserialize)]
struct ScheduleChange {
    procedure_id: String,
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct CompletionChange {
    procedure_id: String,
    date: NaiveDate,
    /// Toggle one step when set.
    #[serde(default)]
    step_id: Option<String>,
    /// Mark the whole procedure done or not done when set.
    #[serde(default)]
    completed: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CompletionView {
    progress: u8,
    completion: Option<Completion>,
}

#[derive(Debug, Deserialize)]
struct NewReminder {
    procedure_id: String,
    time_of_day: String,
    kind: ReminderKind,
}

#[derive(Debug, Deserialize)]
struct ReminderToggle {
    enabled: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let addr = env::var("STEPWISE_API_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let db_url =
        env::var("STEPWISE_DB_URL").unwrap_or_else(|_| "sqlite:stepwise.db?mode=rwc".to_string());
    let cache_dir = env::var("STEPWISE_CACHE_DIR").unwrap_or_else(|_| ".stepwise-cache".to_string());

    let db = match Database::connect(&db_url).await {
        Ok(db) => db,
        Err(err) => {
            warn!(error = %err, "Failed to connect to {}", db_url);
            std::process::exit(1);
        }
    };
    if let Err(err) = db.migrate().await {
        warn!(error = %err, "Failed to run migrations");
        std::process::exit(1);
    }

    let state = AppState {
        db,
        cache_dir: PathBuf::from(cache_dir),
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/procedures", get(list_procedures).post(create_procedure))
        .route(
            "/procedures/:id",
            get(get_procedure).put(update_procedure).delete(delete_procedure),
        )
        .route("/day/:date", get(day_view))
        .route("/schedule", post(add_to_schedule).delete(remove_from_schedule))
        .route("/schedules", get(list_schedules))
        .route("/completions", post(record_completion))
        .route("/reminders", get(list_reminders).post(create_reminder))
        .route("/reminders/:id", put(toggle_reminder).delete(delete_reminder))
        .with_state(state);

    let addr: SocketAddr = addr.parse().expect("Invalid STEPWISE_API_ADDR");
    info!(%addr, "Stepwise API listening");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Resolve the caller's session controller, creating and loading one on
/// first sight of the user id.
async fn session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<Tracker<FileSnapshotStore>>, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or(ApiError::MissingUser)?
        .to_string();

    {
        let sessions = state.sessions.read().await;
        if let Some(tracker) = sessions.get(&user_id) {
            return Ok(Arc::clone(tracker));
        }
    }

    let mut sessions = state.sessions.write().await;
    // Another request may have created the session while the lock was free.
    if let Some(tracker) = sessions.get(&user_id) {
        return Ok(Arc::clone(tracker));
    }

    let snapshots = FileSnapshotStore::new(state.cache_dir.join(&user_id));
    let tracker = Arc::new(Tracker::new(state.db.clone(), snapshots, user_id.clone()));
    let load_state = tracker.load(chrono::Utc::now().date_naive()).await;
    info!(%user_id, ?load_state, "Created session");

    sessions.insert(user_id, Arc::clone(&tracker));
    Ok(tracker)
}

async fn list_procedures(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Procedure>>, ApiError> {
    let tracker = session(&state, &headers).await?;
    Ok(Json(tracker.procedures().await))
}

async fn create_procedure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewProcedure>,
) -> Result<Response, ApiError> {
    let tracker = session(&state, &headers).await?;
    let created = tracker.create_procedure(payload).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn get_procedure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Procedure>, ApiError> {
    let tracker = session(&state, &headers).await?;
    Ok(Json(tracker.procedure(&id).await?))
}

async fn update_procedure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut payload): Json<Procedure>,
) -> Result<Json<Procedure>, ApiError> {
    let tracker = session(&state, &headers).await?;
    payload.id = id;
    Ok(Json(tracker.update_procedure(payload).await?))
}

async fn delete_procedure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tracker = session(&state, &headers).await?;
    tracker.delete_procedure(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn day_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(date): Path<NaiveDate>,
) -> Result<Json<DayView>, ApiError> {
    let tracker = session(&state, &headers).await?;
    tracker.set_date(date).await;

    let mut procedures = Vec::new();
    for procedure in tracker.day_view().await {
        let progress = tracker.progress(&procedure.id).await?;
        let completion = tracker.completion(&procedure.id).await;
        procedures.push(DayEntry {
            procedure,
            progress,
            completion,
        });
    }

    let load_state = format!("{:?}", tracker.load_state().await).to_lowercase();
    Ok(Json(DayView {
        date,
        load_state,
        procedures,
        available: tracker.available().await,
    }))
}

async fn list_schedules(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<stepwise_database::DailySchedule>>, ApiError> {
    let tracker = session(&state, &headers).await?;
    Ok(Json(tracker.schedules().await))
}

async fn add_to_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ScheduleChange>,
) -> Result<StatusCode, ApiError> {
    let tracker = session(&state, &headers).await?;
    tracker.add_to_schedule(&payload.procedure_id, payload.date).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_from_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ScheduleChange>,
) -> Result<StatusCode, ApiError> {
    let tracker = session(&state, &headers).await?;
    tracker
        .remove_from_schedule(&payload.procedure_id, payload.date)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn record_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CompletionChange>,
) -> Result<Json<CompletionView>, ApiError> {
    let tracker = session(&state, &headers).await?;
    tracker.set_date(payload.date).await;

    match (&payload.step_id, payload.completed) {
        (Some(step_id), _) => {
            tracker.toggle_step(&payload.procedure_id, step_id).await?;
        }
        (None, Some(completed)) => {
            tracker
                .set_procedure_completed(&payload.procedure_id, completed)
                .await?;
        }
        (None, None) => return Err(ApiError::BadRequest("step_id or completed is required")),
    }

    Ok(Json(CompletionView {
        progress: tracker.progress(&payload.procedure_id).await?,
        completion: tracker.completion(&payload.procedure_id).await,
    }))
}

async fn list_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Reminder>>, ApiError> {
    let tracker = session(&state, &headers).await?;
    let user_id = tracker.user_id().to_string();

    let mut reminders = reminder::list_reminders(state.db.pool(), &user_id).await?;
    if let Some(procedure_id) = params.get("procedure_id") {
        reminders.retain(|r| &r.procedure_id == procedure_id);
    }
    Ok(Json(reminders))
}

async fn create_reminder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewReminder>,
) -> Result<Response, ApiError> {
    let tracker = session(&state, &headers).await?;
    // The procedure must exist in the session before a reminder can point at it.
    tracker.procedure(&payload.procedure_id).await?;

    let created = reminder::create_reminder(
        state.db.pool(),
        tracker.user_id(),
        &payload.procedure_id,
        &payload.time_of_day,
        payload.kind,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn toggle_reminder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ReminderToggle>,
) -> Result<StatusCode, ApiError> {
    session(&state, &headers).await?;
    reminder::set_reminder_enabled(state.db.pool(), &id, payload.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_reminder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    session(&state, &headers).await?;
    reminder::delete_reminder(state.db.pool(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug)]
enum ApiError {
    MissingUser,
    BadRequest(&'static str),
    NotFound(String),
    Invalid(String),
    Internal(String),
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::UnknownProcedure(id) => ApiError::NotFound(format!("procedure {}", id)),
            TrackerError::UnknownStep(id) => ApiError::NotFound(format!("step {}", id)),
            TrackerError::Database(err) => ApiError::from(err),
            TrackerError::Snapshot(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} {}", entity, id))
            }
            DatabaseError::Invalid(err) => ApiError::Invalid(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingUser => (
                StatusCode::BAD_REQUEST,
                "X-User-Id header is required".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {}", what)),
            ApiError::Invalid(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => {
                warn!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}
