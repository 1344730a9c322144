use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use tryon_service_cli::TryOnRequest;
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::spawn_tryon;
use crate::models::job::{Job, JobFilter, JobStatus};
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Serialize, Deserialize, Debug)]
pub struct TryOnResponse {
    pub success: bool,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TryOnStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for TryOnStatusResponse {
    fn from(job: &Job) -> Self {
        TryOnStatusResponse {
            job_id: job.id.clone(),
            status: job.status(),
            result_image_url: job.result_url().map(str::to_string),
            error: job.error().map(str::to_string),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub job: TryOnStatusResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub product_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntry>,
    pub total: usize,
}

#[derive(Deserialize, Debug, Default)]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

/// POST /api/v1/tryon/generate
pub async fn generate_tryon(
    Extension(state): Extension<AppState>,
    Json(payload): Json<TryOnRequest>,
) -> impl IntoResponse {
    // 1) register the job as processing
    let job_id = state
        .tracker
        .create_for(payload.user_id.clone(), payload.product_image_urls.len());

    // 2) work happens in the background
    spawn_tryon(&state, job_id.clone(), payload);

    // 3) answer immediately
    Json(TryOnResponse {
        success: true,
        job_id,
        status: JobStatus::Processing,
        result_image_url: None,
        error: None,
    })
}

/// POST /api/v1/tryon/generate-sync
///
/// Blocks until the result is stored. The id only names the stored object;
/// the job is never registered with the tracker.
pub async fn generate_tryon_sync(
    Extension(state): Extension<AppState>,
    Json(payload): Json<TryOnRequest>,
) -> Result<Json<TryOnResponse>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let _permit = state.permits.acquire().await.ok();

    let outcome = state
        .pipeline
        .run(&job_id, &payload.user_image_url, &payload.product_image_urls)
        .await
        .map_err(|e| {
            error!(job_id = %job_id, error = %e, "try-on generation failed");
            ApiError::Generation(e.to_string())
        })?;

    Ok(Json(TryOnResponse {
        success: true,
        job_id,
        status: JobStatus::Completed,
        result_image_url: Some(outcome.result_url),
        error: None,
    }))
}

/// GET /api/v1/tryon/status/{job_id}
pub async fn get_tryon_status(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TryOnStatusResponse>, ApiError> {
    let job = state.tracker.get(&job_id)?;
    Ok(Json(TryOnStatusResponse::from(&job)))
}

/// GET /api/v1/tryon/history
pub async fn get_tryon_history(
    Extension(state): Extension<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let filter = JobFilter {
        user_id: query.user_id,
        status: query.status,
        limit: Some(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
    };
    let history: Vec<HistoryEntry> = state
        .tracker
        .list(&filter)
        .iter()
        .map(|job| HistoryEntry {
            job: TryOnStatusResponse::from(job),
            user_id: job.user_id.clone(),
            product_count: job.product_count,
            created_at: job.created_at,
            finished_at: job.finished_at,
        })
        .collect();

    let total = history.len();
    (StatusCode::OK, Json(HistoryResponse { history, total }))
}
