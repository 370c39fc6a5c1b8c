//! Submission, status and artifact endpoints under `/api/convert`.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use papconv::storage::{ChunkRecord, ImageRecord, TableRecord};
use papconv::{
    ConversionService, JobProgressEvent, JobResult, JobStatusView, Rejection, SettingsOverride,
    SubmissionSource,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use super::error::{ApiError, ApiResult};
use super::export::download;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    #[serde(default)]
    pub settings: SettingsOverride,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub accepted: Vec<JobStatusView>,
    pub rejected: Vec<Rejection>,
}

/// Files and settings pulled out of a multipart body.
#[derive(Default)]
struct UploadForm {
    files: Vec<SubmissionSource>,
    settings: SettingsOverride,
}

async fn read_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" | "files[]" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                form.files.push(SubmissionSource::file(filename, bytes.to_vec()));
            }
            "settings" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read settings: {}", e)))?;
                if !text.trim().is_empty() {
                    form.settings = serde_json::from_str(&text).map_err(|e| {
                        ApiError::BadRequest(format!("Invalid settings JSON: {}", e))
                    })?;
                }
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    Ok(form)
}

// ============================================================================
// Submission
// ============================================================================

/// POST /api/convert
pub async fn convert_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    let mut form = read_form(multipart).await?;
    if form.files.len() != 1 {
        return Err(ApiError::BadRequest(format!(
            "Expected exactly one file, got {}",
            form.files.len()
        )));
    }
    let source = form.files.remove(0);
    let settings = form.settings;

    let job = state
        .run(move |service| Ok(service.submit(source, &settings)?))
        .await?;
    tracing::info!("Accepted job {} ({})", job.id, job.filename);

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// POST /api/convert/url
pub async fn convert_url(
    State(state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    let job = state
        .run(move |service| Ok(service.submit(SubmissionSource::url(req.url), &req.settings)?))
        .await?;
    tracing::info!("Accepted URL job {}", job.id);

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// POST /api/convert/batch
pub async fn convert_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<BatchResponse>)> {
    let form = read_form(multipart).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("No files provided".to_string()));
    }

    let outcome = state
        .run(move |service| Ok(service.submit_batch(form.files, &form.settings)?))
        .await?;
    tracing::info!(
        "Batch accepted {} file(s), rejected {}",
        outcome.accepted.len(),
        outcome.rejected.len()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            accepted: outcome.accepted.into_iter().map(JobStatusView::from).collect(),
            rejected: outcome.rejected,
        }),
    ))
}

// ============================================================================
// Status and Results
// ============================================================================

/// GET /api/convert/{id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(state.service.status(&id)?))
}

/// GET /api/convert/{id}/result
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResult>> {
    Ok(Json(state.service.result(&id)?))
}

/// GET /api/convert/{id}/events
///
/// Streams the current snapshot followed by every transition of the job,
/// closing after the terminal event.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    // Subscribe before the snapshot so no transition falls between them.
    let updates = BroadcastStream::new(state.service.subscribe());
    let snapshot = state.service.status(&id)?;

    let initial = Event::default().event("progress").json_data(&snapshot);
    let transitions = if snapshot.status.is_terminal() {
        None
    } else {
        Some(progress_events(Arc::clone(&state.service), updates, id))
    };

    let events = stream::once(async move { initial }).chain(
        stream::iter(transitions)
            .flatten()
            .map(|event| Event::default().event("progress").json_data(&event)),
    );
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Events of one job from `updates`, ending after its terminal or deleted
/// event. When the receiver lags the job is re-read, so a terminal event
/// dropped from the channel still ends the stream.
fn progress_events(
    service: Arc<ConversionService>,
    updates: BroadcastStream<JobProgressEvent>,
    id: String,
) -> impl Stream<Item = JobProgressEvent> + Send {
    stream::unfold(Some(updates), move |updates| {
        let service = Arc::clone(&service);
        let id = id.clone();
        async move {
            let mut updates = updates?;
            while let Some(message) = updates.next().await {
                match message {
                    Ok(event) if event.job_id == id => {
                        let last = event.is_terminal() || event.deleted;
                        return Some((event, if last { None } else { Some(updates) }));
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        tracing::warn!("Event stream for job {} lagged, missed {}", id, missed);
                        match service.progress_snapshot(&id) {
                            Some(event) if event.is_terminal() => return Some((event, None)),
                            Some(_) => {}
                            None => return None,
                        }
                    }
                }
            }
            None
        }
    })
}

/// DELETE /api/convert/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.run(move |service| Ok(service.delete(&id)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Artifacts
// ============================================================================

/// GET /api/convert/{id}/images
pub async fn list_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ImageRecord>>> {
    Ok(Json(state.service.list_images(&id)?))
}

/// GET /api/convert/{id}/images/{image_id}
pub async fn get_image(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let file = state
        .run(move |service| Ok(service.get_image(&id, image_id)?))
        .await?;
    Ok(download(file))
}

/// GET /api/convert/{id}/tables
pub async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TableRecord>>> {
    Ok(Json(state.service.list_tables(&id)?))
}

/// GET /api/convert/{id}/tables/{table_id}/csv
pub async fn get_table_csv(
    State(state): State<AppState>,
    Path((id, table_id)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let file = state
        .run(move |service| Ok(service.get_table_csv(&id, table_id)?))
        .await?;
    Ok(download(file))
}

/// GET /api/convert/{id}/tables/{table_id}/image
pub async fn get_table_image(
    State(state): State<AppState>,
    Path((id, table_id)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let file = state
        .run(move |service| Ok(service.get_table_image(&id, table_id)?))
        .await?;
    Ok(download(file))
}

/// GET /api/convert/{id}/chunks
pub async fn list_chunks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ChunkRecord>>> {
    Ok(Json(state.service.list_chunks(&id)?))
}
