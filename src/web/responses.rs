use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::notify::Notice;

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
    /// Toasts raised while handling the request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            notices: Vec::new(),
        }
    }

    pub fn with_notices(mut self, notices: Vec<Notice>) -> Self {
        self.notices = notices;
        self
    }
}

pub type ApiError = (StatusCode, Json<ApiMessage>);

/// Response for accepted upload submissions.
#[derive(Debug, Serialize, Clone)]
pub struct JobSubmission {
    pub job_id: Uuid,
    pub status_url: String,
}

impl JobSubmission {
    pub fn new(job_id: Uuid, status_url: impl Into<String>) -> Self {
        Self {
            job_id,
            status_url: status_url.into(),
        }
    }
}

/// Successful payload with the notices raised along the way.
#[derive(Debug, Serialize)]
pub struct WithNotices<T: Serialize> {
    #[serde(flatten)]
    pub body: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

impl<T: Serialize> WithNotices<T> {
    pub fn new(body: T, notices: Vec<Notice>) -> Json<Self> {
        Json(Self { body, notices })
    }
}

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiMessage::new(message)))
}

pub fn json_error_with(
    status: StatusCode,
    message: impl Into<String>,
    notices: Vec<Notice>,
) -> ApiError {
    (status, Json(ApiMessage::new(message).with_notices(notices)))
}
