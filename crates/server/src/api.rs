//! HTTP handlers for the import API.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use siphon_jobs::{
    ImportJob, ImportType, JobError, JobScope, NewImportJob, PendingCounts,
};

use crate::state::AppState;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

fn store_error(e: JobError) -> ApiError {
    match e {
        JobError::NotFound(id) => {
            api_error(StatusCode::NOT_FOUND, format!("import job not found: {id}"))
        }
        JobError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        other => {
            error!(error = %other, "job store error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

// ── Health ────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub queue_connected: bool,
    /// Approximate dead-letter depth; `None` without a configured DLQ.
    pub dlq_depth: Option<u64>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let queue_connected = match state.runtime.queue.health_check().await {
        Ok(health) => health.connected,
        Err(_) => false,
    };
    let dlq_depth = state.runtime.queue.dlq_depth().await.unwrap_or(None);
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        queue_connected,
        dlq_depth,
    })
}

// ── Import submission ─────────────────────────────────────────────

/// `POST /imports` — multipart form with a `file` part plus
/// `companyId`, `importType`, and optional `projectId` fields.
/// Persists the upload, creates the job, and enqueues the parent
/// message; responds 202 before any processing happens.
pub async fn create_import(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImportJob>), ApiError> {
    let mut file_path: Option<std::path::PathBuf> = None;
    let mut company_id: Option<Uuid> = None;
    let mut project_id: Option<Uuid> = None;
    let mut import_type: Option<ImportType> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("malformed multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field.bytes().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("failed to read upload: {e}"))
                })?;
                let path = state.upload_dir.join(format!("upload-{}.csv", Uuid::new_v4()));
                tokio::fs::write(&path, &bytes).await.map_err(|e| {
                    error!(error = %e, "failed to persist upload");
                    api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist upload")
                })?;
                file_path = Some(path);
            }
            "companyId" => company_id = Some(parse_uuid_field(field, "companyId").await?),
            "projectId" => project_id = Some(parse_uuid_field(field, "projectId").await?),
            "importType" => {
                let text = field.text().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("bad importType: {e}"))
                })?;
                import_type = Some(ImportType::parse(&text).map_err(|_| {
                    api_error(StatusCode::BAD_REQUEST, format!("unknown importType: {text}"))
                })?);
            }
            _ => {}
        }
    }

    let file_path =
        file_path.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'file' part"))?;
    let company_id = company_id
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'companyId' field"))?;
    let import_type = import_type
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'importType' field"))?;

    let job = state
        .store()
        .create(NewImportJob {
            scope: JobScope { company_id, project_id },
            import_type,
            source_ref: file_path.to_string_lossy().into_owned(),
        })
        .await
        .map_err(store_error)?;

    if let Err(e) = state.runtime.start(&job).await {
        // The job exists but nothing will process it; fail it so the
        // client sees a terminal status rather than a stuck QUEUED.
        error!(job_id = %job.id, error = %e, "failed to enqueue parent message");
        let _ = state
            .store()
            .mark_failed(job.id, serde_json::json!({ "message": e.to_string() }))
            .await;
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to enqueue import",
        ));
    }

    info!(job_id = %job.id, import_type = import_type.as_str(), "import accepted");
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn parse_uuid_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<Uuid, ApiError> {
    let text = field
        .text()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("bad {name}: {e}")))?;
    Uuid::parse_str(text.trim())
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("{name} must be a UUID")))
}

// ── Status & listing ──────────────────────────────────────────────

pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportJob>, ApiError> {
    let job = state.store().get(id).await.map_err(store_error)?;
    Ok(Json(job))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListImportsQuery {
    pub company_id: Uuid,
    pub project_id: Option<Uuid>,
    pub limit: Option<i64>,
}

pub async fn list_imports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListImportsQuery>,
) -> Result<Json<Vec<ImportJob>>, ApiError> {
    let scope = JobScope {
        company_id: query.company_id,
        project_id: query.project_id,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let jobs = state
        .store()
        .list_recent(&scope, limit)
        .await
        .map_err(store_error)?;
    Ok(Json(jobs))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummaryQuery {
    pub company_id: Uuid,
}

pub async fn pending_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingSummaryQuery>,
) -> Result<Json<PendingCounts>, ApiError> {
    let counts = state
        .store()
        .pending_counts(query.company_id)
        .await
        .map_err(store_error)?;
    Ok(Json(counts))
}
