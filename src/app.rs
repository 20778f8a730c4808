use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::downloader::{EXPORT_FILE_NAME, XLSX_MIME};
use crate::error::TaggerError;
use crate::mapping::{Mapping, TagField};
use crate::workspace::Workspace;

pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub struct AppState {
    workspace: Mutex<Workspace>,
}

impl AppState {
    pub fn new(workspace: Workspace) -> Self {
        AppState {
            workspace: Mutex::new(workspace),
        }
    }

    // The auto-save write happens under this same lock
    fn lock(&self) -> MutexGuard<'_, Workspace> {
        self.workspace.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Deserialize)]
struct TopicQuery {
    subject: String,
}

#[derive(Deserialize)]
struct SubtopicQuery {
    subject: String,
    topic: String,
}

#[derive(Deserialize)]
struct FieldUpdate {
    field: TagField,
    #[serde(default)]
    value: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

impl StatusResponse {
    fn ok(message: Option<String>) -> Json<Self> {
        Json(StatusResponse {
            status: "ok".to_string(),
            message,
        })
    }
}

#[derive(Serialize)]
struct QuestionView {
    id: usize,
    question: String,
    answer: String,
    mappings: Vec<Mapping>,
}

#[derive(Serialize)]
struct SessionView {
    source_name: Option<String>,
    columns: Vec<String>,
    questions: Vec<QuestionView>,
    tagged: usize,
    total: usize,
    dirty: bool,
    last_saved: Option<String>,
}

impl IntoResponse for TaggerError {
    fn into_response(self) -> Response {
        let status = if self.is_user_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("{}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error_response(status, self.to_string())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/hierarchy/subjects", get(get_subjects))
        .route("/api/hierarchy/topics", get(get_topics))
        .route("/api/hierarchy/subtopics", get(get_subtopics))
        .route("/api/session", get(get_session))
        .route("/api/upload", post(upload_questions))
        .route("/api/questions/:id/mappings", post(add_mapping))
        .route(
            "/api/questions/:id/mappings/:index",
            post(set_field).delete(remove_mapping),
        )
        .route("/api/clear", post(clear_session))
        .route("/api/export", get(export_questions))
        .route("/api/backup", get(download_backup).post(restore_backup))
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn run(config: Config, workspace: Workspace) -> Result<(), Box<dyn std::error::Error>> {
    let app_state = Arc::new(AppState::new(workspace));

    tokio::spawn(autosave(app_state.clone(), config.autosave_interval()));

    let app = router(app_state.clone());

    let listener = TcpListener::bind(config.bind).await?;
    info!("Listening on http://{}", config.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Don't lose the last interval on a clean shutdown
    if let Err(e) = app_state.lock().flush() {
        error!("final save failed: {}", e);
    }
    Ok(())
}

async fn autosave(state: Arc<AppState>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        // The ticker is the schedule. Write failures are logged by the
        // durability manager and retried on the next tick.
        let _ = state.lock().flush();
    }
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn get_subjects(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ws = state.lock();
    Json(ws.hierarchy().subjects().into_iter().map(String::from).collect::<Vec<_>>())
}

async fn get_topics(
    Query(params): Query<TopicQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let ws = state.lock();
    let topics: Vec<String> = ws
        .hierarchy()
        .topics_for(&params.subject)
        .into_iter()
        .map(String::from)
        .collect();
    Json(topics)
}

async fn get_subtopics(
    Query(params): Query<SubtopicQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let ws = state.lock();
    let subtopics: Vec<String> = ws
        .hierarchy()
        .subtopics_for(&params.subject, &params.topic)
        .into_iter()
        .map(String::from)
        .collect();
    Json(subtopics)
}

async fn get_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ws = state.lock();
    let session = ws.state();
    let store = session.store.as_ref();

    let questions: Vec<QuestionView> = store
        .map(|store| {
            store
                .questions
                .iter()
                .zip(&session.mappings)
                .map(|(q, mappings)| QuestionView {
                    id: q.id,
                    question: store.text(q).to_string(),
                    answer: store.answer(q).to_string(),
                    mappings: mappings.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let (tagged, total) = session.progress();
    Json(SessionView {
        source_name: store.map(|s| s.source_name.clone()),
        columns: store.map(|s| s.columns.clone()).unwrap_or_default(),
        questions,
        tagged,
        total,
        dirty: ws.durability().is_dirty(),
        last_saved: ws.last_saved().map(|t| t.to_rfc3339()),
    })
}

async fn upload_questions(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut upload = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error(e),
        };
        if field.name() == Some("questions") {
            let file_name = field.file_name().unwrap_or("Questions.xlsx").to_string();
            let data = match field.bytes().await {
                Ok(data) => data,
                Err(e) => return multipart_error(e),
            };
            upload = Some((file_name, data));
        }
    }

    let Some((file_name, data)) = upload.filter(|(_, data)| !data.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "No file data received".to_string());
    };

    match state.lock().upload(&file_name, &data) {
        Ok(count) => StatusResponse::ok(Some(format!("Loaded {} questions", count))).into_response(),
        Err(e) => e.into_response(),
    }
}

fn multipart_error(e: MultipartError) -> Response {
    warn!("rejected upload: {}", e.body_text());
    error_response(e.status(), e.body_text())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(StatusResponse {
            status: "error".to_string(),
            message: Some(message),
        }),
    )
        .into_response()
}

async fn add_mapping(
    Path(id): Path<usize>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, TaggerError> {
    let index = state.lock().add_mapping(id)?;
    Ok(Json(serde_json::json!({ "status": "ok", "index": index })))
}

async fn set_field(
    Path((id, index)): Path<(usize, usize)>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FieldUpdate>,
) -> Result<impl IntoResponse, TaggerError> {
    let mapping = state
        .lock()
        .set_field(id, index, payload.field, &payload.value)?;
    Ok(Json(mapping))
}

async fn remove_mapping(
    Path((id, index)): Path<(usize, usize)>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, TaggerError> {
    state.lock().remove_mapping(id, index)?;
    Ok(StatusResponse::ok(None))
}

async fn clear_session(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, TaggerError> {
    state.lock().clear()?;
    Ok(StatusResponse::ok(Some("Session cleared".to_string())))
}

async fn export_questions(State(state): State<Arc<AppState>>) -> Result<Response, TaggerError> {
    let buffer = state.lock().export_xlsx()?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME),
            ),
        ],
        Bytes::from(buffer),
    )
        .into_response())
}

async fn download_backup(State(state): State<Arc<AppState>>) -> Result<Response, TaggerError> {
    let json = state.lock().backup_json()?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"tagging_session_backup.json\"".to_string(),
            ),
        ],
        json,
    )
        .into_response())
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, TaggerError> {
    let count = state.lock().import_backup(&body)?;
    Ok(StatusResponse::ok(Some(format!("Restored {} questions", count))))
}
