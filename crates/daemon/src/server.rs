use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spendlog_core::{
    BackupError, BackupInfo, BackupStats, Frequency, Record, SchedulePolicy, StoreError,
};
use spendlog_storage::RestoreReport;
use tracing::{info, warn};

use crate::app::App;

#[derive(Clone)]
pub struct AppState {
    pub app: App,
    pub api_token: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/records", get(list_records).post(add_record))
        .route("/api/v1/backups", get(list_backups).post(create_backup))
        .route("/api/v1/backups/stats", get(backup_stats))
        .route("/api/v1/backups/import", post(import_backup))
        .route("/api/v1/backups/{id}", axum::routing::delete(delete_backup))
        .route("/api/v1/backups/{id}/download", get(download_backup))
        .route("/api/v1/backups/{id}/share", post(share_backup))
        .route("/api/v1/backups/{id}/restore", post(restore_backup))
        .route("/api/v1/schedule", get(get_schedule).put(put_schedule))
        .route("/api/v1/schedule/test", post(test_schedule))
        .with_state(state)
}

/// Failure surfaced to API clients as `{ "error": kind, "message": text }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    ConfirmationRequired,
    Backup(BackupError),
}

impl From<BackupError> for ApiError {
    fn from(e: BackupError) -> Self {
        ApiError::Backup(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Backup(e.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn status_for(e: &BackupError) -> StatusCode {
    match e {
        BackupError::NotFound(_) | BackupError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        BackupError::CorruptBackup(_) | BackupError::InvalidBackup(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BackupError::InvalidSchedule(_) | BackupError::Store(StoreError::InvalidRecord(_)) => StatusCode::BAD_REQUEST,
        BackupError::SchedulingUnavailable(_) | BackupError::SharingUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        BackupError::Store(_) | BackupError::RestoreVerification { .. } | BackupError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "UnauthorizedError",
                    message: "missing or invalid bearer token".to_owned(),
                },
            ),
            ApiError::ConfirmationRequired => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "ConfirmationRequiredError",
                    message: "destructive operation requires ?confirm=true".to_owned(),
                },
            ),
            ApiError::Backup(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    warn!(error = %e, kind = e.kind(), "request failed");
                }
                (
                    status,
                    ErrorBody {
                        error: e.kind(),
                        message: e.to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

#[derive(Debug, Default, Deserialize)]
struct Confirm {
    #[serde(default)]
    confirm: bool,
}

impl Confirm {
    fn require(&self) -> ApiResult<()> {
        if self.confirm {
            Ok(())
        } else {
            Err(ApiError::ConfirmationRequired)
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    degraded: bool,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        degraded: state.app.degraded,
    })
}

// --- Records ---

#[derive(Debug, Deserialize)]
struct NewRecordBody {
    amount: f64,
    details: String,
    date: String,
}

async fn list_records(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Record>>> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.app.repo.records().list().await?))
}

async fn add_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewRecordBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    require_api_auth(&state, &headers)?;
    let id = state
        .app
        .repo
        .records()
        .add(body.amount, &body.details, &body.date)
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

// --- Backups ---

async fn list_backups(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<BackupInfo>>> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.app.repo.list().await))
}

async fn create_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<BackupInfo>)> {
    require_api_auth(&state, &headers)?;
    let info = state.app.repo.create().await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn backup_stats(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<BackupStats>> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.app.repo.stats().await))
}

async fn delete_backup(
    Path(id): Path<String>,
    Query(confirm): Query<Confirm>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    require_api_auth(&state, &headers)?;
    confirm.require()?;
    state.app.repo.delete(&id).await?;
    info!(backup_id = %id, "backup deleted via api");
    Ok(StatusCode::NO_CONTENT)
}

async fn download_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_api_auth(&state, &headers)?;
    let path = state.app.repo.export(&id).await?;
    let bytes = tokio::fs::read(&path).await.map_err(BackupError::from)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{id}.json"));

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_owned()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename={filename}")),
        ],
        bytes,
    )
        .into_response())
}

async fn share_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    let path = state.app.repo.share(&id, state.app.share.as_ref()).await?;
    Ok(Json(serde_json::json!({ "shared": path.display().to_string() })))
}

async fn restore_backup(
    Path(id): Path<String>,
    Query(confirm): Query<Confirm>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RestoreReport>> {
    require_api_auth(&state, &headers)?;
    confirm.require()?;
    Ok(Json(state.app.restore.restore(&id).await?))
}

async fn import_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BackupInfo>)> {
    require_api_auth(&state, &headers)?;
    let staged = tempfile::NamedTempFile::new().map_err(BackupError::from)?;
    tokio::fs::write(staged.path(), &body)
        .await
        .map_err(BackupError::from)?;
    let info = state.app.repo.import(staged.path()).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

// --- Schedule ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleView {
    #[serde(flatten)]
    policy: SchedulePolicy,
    next_backup_time: Option<DateTime<Utc>>,
}

fn schedule_view(app: &App, policy: SchedulePolicy) -> ScheduleView {
    ScheduleView {
        next_backup_time: app.scheduler.next_backup_time(&policy),
        policy,
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleUpdate {
    enabled: Option<bool>,
    frequency: Option<Frequency>,
    time: Option<String>,
}

async fn get_schedule(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<ScheduleView>> {
    require_api_auth(&state, &headers)?;
    let policy = state.app.scheduler.policy().await;
    Ok(Json(schedule_view(&state.app, policy)))
}

async fn put_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScheduleUpdate>,
) -> ApiResult<Json<ScheduleView>> {
    require_api_auth(&state, &headers)?;
    let scheduler = &state.app.scheduler;
    let mut policy = if body.frequency.is_some() || body.time.is_some() {
        scheduler.update(body.frequency, body.time.as_deref()).await?
    } else {
        scheduler.policy().await
    };
    match body.enabled {
        Some(true) if !policy.enabled => policy = scheduler.enable().await?,
        Some(false) if policy.enabled => policy = scheduler.disable().await?,
        _ => {}
    }
    Ok(Json(schedule_view(&state.app, policy)))
}

async fn test_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<BackupInfo>)> {
    require_api_auth(&state, &headers)?;
    let info = state.app.scheduler.test_backup().await?;
    Ok((StatusCode::CREATED, Json(info)))
}
