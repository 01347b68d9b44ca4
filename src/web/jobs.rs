use std::convert::Infallible;

use axum::{
    Json,
    extract::{Multipart, Path as AxumPath, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    location::{Coordinates, LocationFix},
    notify::Notifier,
    pipeline::{
        ArtifactInput, PipelineError, PipelineEvent, PipelineVariant, SubmissionHandle,
        UploadLocation, ValidationError,
    },
    web::{
        AppState,
        auth::require_identity,
        responses::{ApiError, ApiMessage, JobSubmission, json_error, json_error_with},
        state::UploadJob,
        status::UploadStatusResponse,
        uploads::{UploadForm, read_upload_form},
    },
};

const FILE_FIELD: &str = "file";

fn status_url(job_id: Uuid) -> String {
    format!("/api/uploads/{job_id}")
}

/// Accepts the upload form, runs it through a fresh pipeline and starts the
/// analysis. The pipeline is discarded again if it never starts.
pub async fn create_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<JobSubmission>, ApiError> {
    require_identity(&state).await?;

    let max_bytes = state.settings().upload_max_bytes;
    let form = read_upload_form(multipart, &[FILE_FIELD], max_bytes)
        .await
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.message()))?;

    let variant = match form.first_text("variant") {
        Some("upload_only") => PipelineVariant::UploadOnly,
        _ => PipelineVariant::FieldRegistration,
    };
    let (job_id, job) = state.create_job(variant);

    let handle = match start_job(&job, form, max_bytes).await {
        Ok(handle) => handle,
        Err(err) => {
            state.remove_job(job_id);
            warn!(%job_id, %err, "upload refused");
            return Err(json_error_with(
                pipeline_status(&err),
                err.message(),
                job.notices.drain(),
            ));
        }
    };

    info!(%job_id, run_id = %handle.run_id(), "upload accepted");
    Ok(Json(JobSubmission::new(job_id, status_url(job_id))))
}

async fn start_job(
    job: &UploadJob,
    mut form: UploadForm,
    max_bytes: u64,
) -> Result<SubmissionHandle, PipelineError> {
    let pipeline = &job.pipeline;

    if let Some(file) = form.take_file(FILE_FIELD) {
        if file.is_truncated() {
            let err = ValidationError::FileTooLarge {
                size_bytes: file.size_bytes,
                max_bytes,
            };
            job.notices.notify(err.notice());
            return Err(err.into());
        }
        pipeline
            .select(ArtifactInput::new(
                file.original_name,
                file.content_type,
                file.bytes,
            ))
            .await?;
    }

    pipeline.set_location(location_from_form(&form))?;
    pipeline.set_field_id(form.first_text("field_id").map(str::to_string))?;
    pipeline.submit()
}

/// Coordinates win over the free-text field when both are present and valid.
fn location_from_form(form: &UploadForm) -> Option<UploadLocation> {
    let lat = form.first_text("lat").and_then(|v| v.parse::<f64>().ok());
    let lng = form.first_text("lng").and_then(|v| v.parse::<f64>().ok());
    if let Some(coordinates) = lat.zip(lng).and_then(|(lat, lng)| Coordinates::new(lat, lng)) {
        return Some(UploadLocation::Fix(LocationFix::from(coordinates)));
    }

    form.first_text("location")
        .map(|text| UploadLocation::Text(text.to_string()))
}

fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Validation(ValidationError::InvalidFileType { .. }) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        PipelineError::Validation(ValidationError::FileTooLarge { .. }) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
        PipelineError::Busy | PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PipelineError::Superseded | PipelineError::TornDown => StatusCode::GONE,
        PipelineError::AnalysisFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

fn find_job(state: &AppState, job_id: Uuid) -> Result<UploadJob, ApiError> {
    state
        .job(job_id)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "Upload not found"))
}

pub async fn upload_status(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<Uuid>,
) -> Result<Json<UploadStatusResponse>, ApiError> {
    require_identity(&state).await?;
    let job = find_job(&state, job_id)?;

    let pipeline = &job.pipeline;
    Ok(Json(UploadStatusResponse::new(
        job_id,
        pipeline.variant(),
        pipeline.state(),
        pipeline.artifact().map(|artifact| artifact.file_name),
        job.notices.drain(),
    )))
}

/// Moves a failed upload back to validated and submits it again with the
/// same image and metadata.
pub async fn retry_upload(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<Uuid>,
) -> Result<Json<JobSubmission>, ApiError> {
    require_identity(&state).await?;
    let job = find_job(&state, job_id)?;

    let handle = job
        .pipeline
        .retry()
        .and_then(|()| job.pipeline.submit())
        .map_err(|err| json_error_with(pipeline_status(&err), err.message(), job.notices.drain()))?;

    info!(%job_id, run_id = %handle.run_id(), "upload resubmitted");
    Ok(Json(JobSubmission::new(job_id, status_url(job_id))))
}

#[derive(Debug, Serialize)]
pub struct UploadPreview {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub preview_data_uri: String,
}

pub async fn upload_preview(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<Uuid>,
) -> Result<Json<UploadPreview>, ApiError> {
    require_identity(&state).await?;
    let job = find_job(&state, job_id)?;
    let artifact = job
        .pipeline
        .artifact()
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "No image selected"))?;

    Ok(Json(UploadPreview {
        file_name: artifact.file_name,
        mime_type: artifact.mime_type,
        size_bytes: artifact.size_bytes,
        preview_data_uri: artifact.preview_data_uri,
    }))
}

/// Drops the selected image but keeps the job and its metadata.
pub async fn clear_artifact(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, ApiError> {
    require_identity(&state).await?;
    let job = find_job(&state, job_id)?;
    job.pipeline
        .clear()
        .map_err(|err| json_error(pipeline_status(&err), err.message()))?;
    Ok(Json(ApiMessage::new("Image removed")))
}

/// Streams pipeline events as server-sent events until the current run
/// settles or the job is discarded.
pub async fn upload_events(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_identity(&state).await?;
    let job = find_job(&state, job_id)?;

    let frames = pipeline_events(job.pipeline.subscribe()).filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(err) => {
                warn!(?err, "failed to encode pipeline event");
                None
            }
        }
    });
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

fn pipeline_events(
    receiver: broadcast::Receiver<PipelineEvent>,
) -> impl Stream<Item = PipelineEvent> {
    stream::unfold(Some(receiver), |receiver| async move {
        let mut receiver = receiver?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let settled = !matches!(event, PipelineEvent::Progress { .. });
                    let next = (!settled).then_some(receiver);
                    return Some((event, next));
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event subscriber lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

pub async fn delete_upload(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_identity(&state).await?;
    match state.remove_job(job_id) {
        Some(_) => {
            info!(%job_id, "upload discarded");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(json_error(StatusCode::NOT_FOUND, "Upload not found")),
    }
}
