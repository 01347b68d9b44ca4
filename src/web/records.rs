use axum::{
    Json,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    appointments::{Appointment, AppointmentRequest},
    farmers::{FarmerForm, FarmerRecord, FormError},
    location::{GeolocationError, LocationFix, MockLabeler},
    notify::Notice,
    results::{AnalysisResult, ResultSummary},
    web::{
        AppState,
        auth::require_identity,
        responses::{ApiError, WithNotices, json_error_with},
    },
};

#[derive(Debug, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub headline: String,
    pub healthy: bool,
}

/// Unknown ids resolve to the default record.
pub async fn result(
    State(state): State<AppState>,
    AxumPath(result_id): AxumPath<String>,
) -> Result<Json<ResultView>, ApiError> {
    require_identity(&state).await?;
    let result = state.results().lookup(&result_id);
    Ok(Json(ResultView {
        headline: result.headline(),
        healthy: result.is_healthy(),
        result,
    }))
}

#[derive(Debug, Serialize)]
pub struct UserDashboard {
    pub summary: ResultSummary,
    pub recent: Vec<AnalysisResult>,
}

pub async fn dashboard(State(state): State<AppState>) -> Result<Json<UserDashboard>, ApiError> {
    require_identity(&state).await?;
    Ok(Json(UserDashboard {
        summary: state.results().summary(),
        recent: state.results().list(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectQuery {
    pub mode: Option<String>,
}

/// Coordinate detection runs as a background request that is cancelled if the
/// client goes away.
pub async fn detect_location(
    State(state): State<AppState>,
    Query(query): Query<DetectQuery>,
) -> Result<Json<WithNotices<LocationFix>>, ApiError> {
    require_identity(&state).await?;
    let detector = state.location();
    let outcome = match query.mode.as_deref() {
        Some("label") => detector.detect_label(&MockLabeler).await,
        _ => detector.start().outcome().await,
    };

    match outcome {
        Ok(fix) => {
            let notice = match &fix {
                LocationFix::Label { label } => {
                    Notice::info("Location detected", format!("Your location: {label}"))
                }
                LocationFix::Coordinates { .. } => Notice::info("Location detected", fix.describe()),
            };
            Ok(WithNotices::new(fix, vec![notice]))
        }
        Err(err) => {
            let (status, notice) = match err {
                GeolocationError::Unsupported => (
                    StatusCode::NOT_IMPLEMENTED,
                    Notice::destructive(
                        "Location not supported",
                        "Your browser doesn't support geolocation",
                    ),
                ),
                GeolocationError::AlreadyInProgress => (
                    StatusCode::CONFLICT,
                    Notice::destructive("Location detection failed", err.message()),
                ),
                GeolocationError::Timeout => (
                    StatusCode::GATEWAY_TIMEOUT,
                    Notice::destructive(
                        "Location detection failed",
                        "Please enter your location manually",
                    ),
                ),
                _ => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Notice::destructive(
                        "Location detection failed",
                        "Please enter your location manually",
                    ),
                ),
            };
            Err(json_error_with(status, err.message(), vec![notice]))
        }
    }
}

fn form_rejected(err: FormError) -> ApiError {
    let notice = err.notice();
    json_error_with(StatusCode::BAD_REQUEST, err.message(), vec![notice])
}

pub async fn list_farmers(State(state): State<AppState>) -> Result<Json<Vec<FarmerRecord>>, ApiError> {
    require_identity(&state).await?;
    Ok(Json(state.farmers().list()))
}

pub async fn register_farmer(
    State(state): State<AppState>,
    Json(form): Json<FarmerForm>,
) -> Result<Json<WithNotices<FarmerRecord>>, ApiError> {
    require_identity(&state).await?;
    let record = state.farmers().register(form).await.map_err(form_rejected)?;
    info!(farmer_id = record.id, "farmer registered via api");
    Ok(WithNotices::new(
        record,
        vec![Notice::info(
            "Details saved successfully",
            "You can now proceed to upload your crop image",
        )],
    ))
}

pub async fn list_appointments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    require_identity(&state).await?;
    Ok(Json(state.appointments().list()))
}

pub async fn schedule_appointment(
    State(state): State<AppState>,
    Json(request): Json<AppointmentRequest>,
) -> Result<Json<WithNotices<Appointment>>, ApiError> {
    require_identity(&state).await?;
    let appointment = state
        .appointments()
        .schedule(request)
        .await
        .map_err(form_rejected)?;
    Ok(WithNotices::new(
        appointment,
        vec![Notice::info(
            "Appointment created",
            "Your appointment has been scheduled successfully",
        )],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Settings, location::Coordinates, session::MemoryStore};

    async fn signed_in(settings: Settings) -> AppState {
        let state = AppState::with_session_store(settings, MemoryStore::shared());
        state.auth().login("farmer@example.com", "pw").await.unwrap();
        state
    }

    #[tokio::test]
    async fn unknown_results_fall_back() {
        let state = signed_in(Settings::default()).await;
        let Json(view) = result(State(state), AxumPath("analysis-missing".to_string()))
            .await
            .unwrap();
        assert_eq!(view.result.id, "analysis-001");
        assert_eq!(view.headline, "Detected Disease: Leaf Blight");
    }

    #[tokio::test]
    async fn dashboard_requires_identity() {
        let state = AppState::with_session_store(Settings::default(), MemoryStore::shared());
        let (status, _) = dashboard(State(state)).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn detection_without_a_provider_is_unsupported() {
        let state = signed_in(Settings::default()).await;
        let (status, Json(body)) = detect_location(State(state), Query(DetectQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body.notices[0].title, "Location not supported");
    }

    #[tokio::test]
    async fn detection_requires_identity() {
        let settings = Settings {
            fixed_position: Coordinates::new(14.6, 121.0),
            ..Settings::default()
        };
        let state = AppState::with_session_store(settings, MemoryStore::shared());
        let (status, Json(body)) = detect_location(State(state), Query(DetectQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.notices[0].title, "Authentication required");
    }

    #[tokio::test]
    async fn label_mode_returns_a_mock_label() {
        let settings = Settings {
            fixed_position: Coordinates::new(14.6, 121.0),
            ..Settings::default()
        };
        let state = signed_in(settings).await;
        let Json(body) = detect_location(
            State(state),
            Query(DetectQuery {
                mode: Some("label".to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(matches!(body.body, LocationFix::Label { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn farmer_registration_reports_missing_location() {
        let state = signed_in(Settings::default()).await;
        let (status, Json(body)) = register_farmer(
            State(state),
            Json(FarmerForm {
                name: "Ana".to_string(),
                phone: "123".to_string(),
                location_label: "North".to_string(),
                coordinates: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.notices[0].title, "Location required");
    }
}
