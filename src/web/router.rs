use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::web::{AppState, admin, auth, jobs, records};

/// Headroom for multipart framing and the text fields around the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.settings().upload_max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::session))
        .route("/api/admin/login", post(admin::login))
        .route("/api/admin/logout", post(admin::logout))
        .route("/api/admin/dashboard", get(admin::dashboard))
        .route(
            "/api/uploads",
            post(jobs::create_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/uploads/:id",
            get(jobs::upload_status).delete(jobs::delete_upload),
        )
        .route("/api/uploads/:id/retry", post(jobs::retry_upload))
        .route("/api/uploads/:id/events", get(jobs::upload_events))
        .route(
            "/api/uploads/:id/artifact",
            get(jobs::upload_preview).delete(jobs::clear_artifact),
        )
        .route("/api/results/:id", get(records::result))
        .route("/api/dashboard", get(records::dashboard))
        .route("/api/location/detect", post(records::detect_location))
        .route(
            "/api/farmers",
            get(records::list_farmers).post(records::register_farmer),
        )
        .route(
            "/api/appointments",
            get(records::list_appointments).post(records::schedule_appointment),
        )
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
