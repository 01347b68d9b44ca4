use serde::Serialize;
use uuid::Uuid;

use crate::{
    notify::Notice,
    pipeline::{PipelineState, PipelineVariant},
};

/// Coarse job status reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<&PipelineState> for JobStatus {
    fn from(state: &PipelineState) -> Self {
        match state {
            PipelineState::Idle | PipelineState::Validated => JobStatus::Pending,
            PipelineState::Submitting { .. } => JobStatus::Processing,
            PipelineState::Completed { .. } => JobStatus::Completed,
            PipelineState::Failed { .. } => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadStatusResponse {
    pub job_id: Uuid,
    pub variant: PipelineVariant,
    pub status: JobStatus,
    pub state: PipelineState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub notices: Vec<Notice>,
}

impl UploadStatusResponse {
    pub fn new(
        job_id: Uuid,
        variant: PipelineVariant,
        state: PipelineState,
        file_name: Option<String>,
        notices: Vec<Notice>,
    ) -> Self {
        let result_id = match &state {
            PipelineState::Completed { result_id } => Some(result_id.clone()),
            _ => None,
        };
        let error_message = match &state {
            PipelineState::Failed { reason } => Some(reason.clone()),
            _ => None,
        };

        Self {
            job_id,
            variant,
            status: JobStatus::from(&state),
            progress: state.progress(),
            result_url: result_id.as_ref().map(|id| format!("/api/results/{id}")),
            result_id,
            error_message,
            file_name,
            state,
            notices,
        }
    }
}
