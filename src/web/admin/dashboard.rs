use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    admin::GuardOutcome,
    appointments::Appointment,
    farmers::FarmerRecord,
    notify::RecordingNotifier,
    results::{AnalysisResult, ResultSummary},
    web::{AppState, responses::ApiMessage},
};

const DASHBOARD_PATH: &str = "/admin-dashboard";

#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub farmers: Vec<FarmerRecord>,
    pub results: Vec<AnalysisResult>,
    pub summary: ResultSummary,
    pub appointments: Vec<Appointment>,
}

/// Guarded overview. A denied request is redirected to the admin login with
/// the denial notice in the body.
pub async fn dashboard(State(state): State<AppState>) -> Result<Json<AdminDashboard>, Response> {
    let notices = RecordingNotifier::new();
    let outcome = state
        .route_access(Arc::new(notices.clone()))
        .evaluate(DASHBOARD_PATH)
        .await;

    match outcome {
        GuardOutcome::RenderChildren => Ok(Json(AdminDashboard {
            farmers: state.farmers().list(),
            results: state.results().list(),
            summary: state.results().summary(),
            appointments: state.appointments().list(),
        })),
        GuardOutcome::Redirect(location) => Err((
            StatusCode::SEE_OTHER,
            [(header::LOCATION, location)],
            Json(ApiMessage::new("Administrator access required").with_notices(notices.drain())),
        )
            .into_response()),
        GuardOutcome::RenderNothing => Err(StatusCode::NO_CONTENT.into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Settings, session::MemoryStore};

    #[tokio::test]
    async fn denied_requests_redirect_to_the_admin_login() {
        let state = AppState::with_session_store(Settings::default(), MemoryStore::shared());

        let response = dashboard(State(state.clone())).await.unwrap_err();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/admin-login"
        );

        state.admin().login("admin", "admin123").unwrap();
        let Json(body) = dashboard(State(state)).await.unwrap();
        assert_eq!(body.farmers.len(), 3);
        assert_eq!(body.appointments.len(), 2);
        assert_eq!(body.summary.total, 3);
    }
}
