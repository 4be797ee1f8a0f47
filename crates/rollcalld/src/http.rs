//! HTTP surface for the attendance daemon.
//!
//! The capture endpoint never answers 5xx for a frame that simply failed
//! to match: all four pipeline outcomes are 200 with a status tag. Hard
//! failures are reserved for malformed input (400) and genuine
//! infrastructure problems (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Local, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pipeline::{Pipeline, PipelineError, RegisterOutcome};
use rollcall_store::StoreError;

pub struct AppState {
    pub pipeline: Pipeline,
    pub version: String,
    pub db_path: String,
    pub frame_stride: usize,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/capture", post(capture))
        .route("/api/v1/students", post(create_student).get(list_students))
        .route("/api/v1/students/:student_number/face", post(register_face))
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/api/v1/sessions/active", get(active_session))
        .route("/api/v1/registrations", post(create_registration))
        .route("/api/v1/attendance", get(attendance))
        .route("/api/v1/status", get(status))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(StoreError::StudentNotFound(s)) => {
                ApiError::NotFound(format!("unknown student: {s}"))
            }
            PipelineError::Store(StoreError::SessionNotFound(id)) => {
                ApiError::NotFound(format!("unknown session: {id}"))
            }
            other => {
                tracing::error!(error = %other, "pipeline failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (code, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// --- capture ---

#[derive(Deserialize)]
struct CaptureRequest {
    image_data: String,
    /// ISO-8601; defaults to now.
    at_time: Option<String>,
    /// Restrict session resolution to one lecturer's timetable.
    lecturer: Option<String>,
}

#[derive(Serialize)]
struct CaptureResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    student_name: Option<String>,
}

async fn capture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CaptureRequest>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let image = decode_image(&req.image_data)?;
    let at = parse_at_time(req.at_time.as_deref())?;

    let outcome = state
        .pipeline
        .capture(image, at, req.lecturer.as_deref())
        .await?;

    let (student_id, student_name) = match outcome.student() {
        Some(s) => (Some(s.student_number.clone()), Some(s.name.clone())),
        None => (None, None),
    };
    Ok(Json(CaptureResponse {
        status: outcome.status_str(),
        student_id,
        student_name,
    }))
}

// --- face registration ---

#[derive(Deserialize)]
struct RegisterFaceRequest {
    image_data: String,
}

async fn register_face(
    State(state): State<Arc<AppState>>,
    Path(student_number): Path<String>,
    Json(req): Json<RegisterFaceRequest>,
) -> Result<Response, ApiError> {
    let image = decode_image(&req.image_data)?;

    match state.pipeline.register_face(&student_number, image).await? {
        RegisterOutcome::Registered => {
            Ok(Json(serde_json::json!({ "status": "registered" })).into_response())
        }
        RegisterOutcome::NoFace => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "status": "no_face_detected",
                "error": "no usable face in the submitted image; nothing was stored"
            })),
        )
            .into_response()),
    }
}

// --- admin ingestion / listing ---

#[derive(Deserialize)]
struct CreateStudentRequest {
    student_number: String,
    name: String,
}

async fn create_student(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateStudentRequest>,
) -> Result<StatusCode, ApiError> {
    if req.student_number.trim().is_empty() || req.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "student_number and name are required".into(),
        ));
    }
    state
        .pipeline
        .store()
        .add_student(req.student_number, req.name)
        .await?;
    Ok(StatusCode::CREATED)
}

#[derive(Serialize)]
struct StudentDto {
    student_number: String,
    name: String,
    has_embedding: bool,
}

async fn list_students(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StudentDto>>, ApiError> {
    let students = state.pipeline.store().list_students().await?;
    Ok(Json(
        students
            .into_iter()
            .map(|s| StudentDto {
                student_number: s.student_number,
                name: s.name,
                has_embedding: s.embedding.is_some(),
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    course_code: String,
    lecturer_number: String,
    weekday: String,
    start: String,
    end: String,
    venue: String,
}

#[derive(Serialize)]
struct SessionDto {
    id: i64,
    course_code: String,
    lecturer_number: String,
    weekday: String,
    start: String,
    end: String,
    venue: String,
}

impl From<rollcall_core::Session> for SessionDto {
    fn from(s: rollcall_core::Session) -> Self {
        SessionDto {
            id: s.id,
            course_code: s.course_code,
            lecturer_number: s.lecturer_number,
            weekday: s.weekday.to_string(),
            start: s.start.format("%H:%M").to_string(),
            end: s.end.format("%H:%M").to_string(),
            venue: s.venue,
        }
    }
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let weekday: Weekday = req
        .weekday
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("bad weekday: {}", req.weekday)))?;
    let start = parse_time(&req.start)?;
    let end = parse_time(&req.end)?;
    if start >= end {
        return Err(ApiError::BadRequest(
            "session start must be before end".into(),
        ));
    }

    let id = state
        .pipeline
        .store()
        .add_session(
            req.course_code,
            req.lecturer_number,
            weekday,
            start,
            end,
            req.venue,
        )
        .await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionDto>>, ApiError> {
    let sessions = state.pipeline.store().list_sessions().await?;
    Ok(Json(sessions.into_iter().map(SessionDto::from).collect()))
}

#[derive(Deserialize)]
struct CreateRegistrationRequest {
    student_number: String,
    course_code: String,
}

async fn create_registration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRegistrationRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .pipeline
        .store()
        .add_registration(req.student_number, req.course_code)
        .await?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct AttendanceQuery {
    date: Option<NaiveDate>,
}

#[derive(Serialize)]
struct AttendanceDto {
    student_id: String,
    session_id: i64,
    date: String,
    time: String,
    status: String,
}

async fn attendance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AttendanceQuery>,
) -> Result<Json<Vec<AttendanceDto>>, ApiError> {
    let date = query.date.unwrap_or_else(|| Local::now().date_naive());
    let records = state.pipeline.store().attendance_on(date).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| AttendanceDto {
                student_id: r.student_number,
                session_id: r.session_id,
                date: r.date.format("%Y-%m-%d").to_string(),
                time: r.time.format("%H:%M:%S").to_string(),
                status: r.status.as_str().to_string(),
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct ActiveSessionQuery {
    at: Option<String>,
    lecturer: Option<String>,
}

#[derive(Serialize)]
struct RosterEntryDto {
    student_id: String,
    student_name: String,
    has_embedding: bool,
    marked: bool,
}

#[derive(Serialize)]
struct ActiveSessionResponse {
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    roster: Option<Vec<RosterEntryDto>>,
    all_marked: bool,
}

async fn active_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActiveSessionQuery>,
) -> Result<Json<ActiveSessionResponse>, ApiError> {
    let at = parse_at_time(query.at.as_deref())?;
    let status = state
        .pipeline
        .roster_status(at, query.lecturer.as_deref())
        .await?;

    let Some((session, entries)) = status else {
        return Ok(Json(ActiveSessionResponse {
            active: false,
            session: None,
            roster: None,
            all_marked: false,
        }));
    };

    let all_marked = !entries.is_empty() && entries.iter().all(|e| e.marked);
    Ok(Json(ActiveSessionResponse {
        active: true,
        session: Some(session.into()),
        roster: Some(
            entries
                .into_iter()
                .map(|e| RosterEntryDto {
                    student_id: e.student.student_number,
                    student_name: e.student.name,
                    has_embedding: e.student.embedding.is_some(),
                    marked: e.marked,
                })
                .collect(),
        ),
        all_marked,
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": state.version,
        "db_path": state.db_path,
        "similarity_threshold": state.pipeline.threshold(),
        "frame_stride": state.frame_stride,
    }))
}

// --- input parsing ---

fn decode_image(image_data: &str) -> Result<Vec<u8>, ApiError> {
    let bytes = BASE64
        .decode(image_data.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_data is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("image_data is empty".into()));
    }
    Ok(bytes)
}

fn parse_at_time(at_time: Option<&str>) -> Result<NaiveDateTime, ApiError> {
    let Some(raw) = at_time else {
        return Ok(Local::now().naive_local());
    };
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| ApiError::BadRequest(format!("bad at_time: {raw}")))
}

fn parse_time(raw: &str) -> Result<chrono::NaiveTime, ApiError> {
    chrono::NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ApiError::BadRequest(format!("bad time: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image_rejects_bad_base64() {
        assert!(decode_image("not base64!!!").is_err());
        assert!(decode_image("").is_err());
        assert!(decode_image(&BASE64.encode(b"jpeg bytes")).is_ok());
    }

    #[test]
    fn test_parse_at_time_accepts_both_forms() {
        assert!(parse_at_time(Some("2025-09-01T10:00:00")).is_ok());
        assert!(parse_at_time(Some("2025-09-01T10:00:00+02:00")).is_ok());
        assert!(parse_at_time(Some("yesterday")).is_err());
        assert!(parse_at_time(None).is_ok());
    }

    #[test]
    fn test_parse_time_forms() {
        assert!(parse_time("10:00").is_ok());
        assert!(parse_time("10:00:30").is_ok());
        assert!(parse_time("25:00").is_err());
    }
}
