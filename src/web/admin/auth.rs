use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::{error, info};

use crate::{
    admin::AdminLoginError,
    notify::Notice,
    web::{
        AppState,
        responses::{ApiError, ApiMessage, WithNotices, json_error_with},
    },
};

#[derive(Deserialize)]
pub struct AdminLoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(form): Json<AdminLoginForm>,
) -> Result<Json<WithNotices<ApiMessage>>, ApiError> {
    if let Err(err) = state.admin().login(&form.username, &form.password) {
        let status = match &err {
            AdminLoginError::MissingFields => StatusCode::BAD_REQUEST,
            AdminLoginError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AdminLoginError::Storage(_) => {
                error!(?err, "failed to record administrator session");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = err.message().to_string();
        return Err(json_error_with(
            status,
            message.clone(),
            vec![Notice::destructive("Error", message)],
        ));
    }

    info!("administrator signed in");
    Ok(WithNotices::new(
        ApiMessage::new("Admin session granted"),
        vec![Notice::info("Success", "Logged in as administrator")],
    ))
}

pub async fn logout(State(state): State<AppState>) -> Json<ApiMessage> {
    state.admin().revoke();
    Json(ApiMessage::new("Admin session cleared"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Settings, session::MemoryStore};

    fn form(username: &str, password: &str) -> Json<AdminLoginForm> {
        Json(AdminLoginForm {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn login_maps_failures_to_status_codes() {
        let state = AppState::with_session_store(Settings::default(), MemoryStore::shared());

        let (status, _) = login(State(state.clone()), form("", "")).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, Json(body)) = login(State(state.clone()), form("admin", "nope"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.message, "Invalid credentials");
        assert!(!state.admin().is_granted());

        login(State(state.clone()), form("admin", "admin123"))
            .await
            .unwrap();
        assert!(state.admin().is_granted());

        logout(State(state.clone())).await;
        assert!(!state.admin().is_granted());
    }

    #[tokio::test]
    async fn padded_usernames_are_not_trimmed() {
        let state = AppState::with_session_store(Settings::default(), MemoryStore::shared());

        let (status, _) = login(State(state.clone()), form("  admin ", "admin123"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!state.admin().is_granted());
    }
}
