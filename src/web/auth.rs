use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    admin::GuardOutcome,
    auth::{AuthError, AuthErrorKind, Identity},
    notify::{Notice, RecordingNotifier},
    routes::Access,
    web::{
        AppState,
        responses::{ApiError, ApiMessage, WithNotices, json_error, json_error_with},
    },
};

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

/// Resolves the signed-in identity or answers 401 with a single denial notice.
pub async fn require_identity(state: &AppState) -> Result<Identity, ApiError> {
    let notices = RecordingNotifier::new();
    let outcome = state
        .route_access(Arc::new(notices.clone()))
        .authorize(Access::Protected)
        .await;

    match (outcome, state.auth().current_identity()) {
        (GuardOutcome::RenderChildren, Some(identity)) => Ok(identity),
        (GuardOutcome::RenderNothing, _) => Err(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Session is still loading",
        )),
        _ => Err(json_error_with(
            StatusCode::UNAUTHORIZED,
            "Please log in to continue",
            notices.drain(),
        )),
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> Result<Json<WithNotices<Identity>>, ApiError> {
    let identity = state
        .auth()
        .login(&form.email, &form.password)
        .await
        .map_err(auth_failure)?;

    Ok(WithNotices::new(
        identity,
        vec![Notice::info("Success", "Logged in successfully")],
    ))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(form): Json<SignupForm>,
) -> Result<Json<WithNotices<Identity>>, ApiError> {
    if form.password != form.confirm_password {
        let notice = Notice::destructive("Error", "Passwords do not match");
        return Err(json_error_with(
            StatusCode::BAD_REQUEST,
            notice.description.clone(),
            vec![notice],
        ));
    }

    let identity = state
        .auth()
        .signup(&form.email, &form.password, &form.name)
        .await
        .map_err(auth_failure)?;

    Ok(WithNotices::new(
        identity,
        vec![Notice::info("Success", "Account created successfully!")],
    ))
}

pub async fn logout(State(state): State<AppState>) -> Result<Json<ApiMessage>, ApiError> {
    state.auth().logout().map_err(auth_failure)?;
    Ok(Json(ApiMessage::new("Logged out")))
}

pub async fn session(State(state): State<AppState>) -> Json<SessionResponse> {
    let auth_state = state.auth().state();
    Json(SessionResponse {
        state: auth_state.as_str(),
        identity: auth_state.identity().cloned(),
    })
}

fn auth_failure(err: AuthError) -> ApiError {
    let status = match err.kind {
        AuthErrorKind::MissingFields => StatusCode::BAD_REQUEST,
        AuthErrorKind::Transport => StatusCode::BAD_GATEWAY,
        AuthErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(?err, "authentication request failed");
    } else {
        warn!(reason = err.reason(), "authentication request rejected");
    }

    let message = err.message();
    json_error_with(
        status,
        message.clone(),
        vec![Notice::destructive("Error", message)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        session::{KeyValueStore, MemoryStore, StoreError, StoreResult},
    };

    struct UnclearableStore(MemoryStore);

    impl KeyValueStore for UnclearableStore {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.0.set(key, value)
        }

        fn clear(&self, _: &str) -> StoreResult<()> {
            Err(StoreError::new("permission denied"))
        }
    }

    fn state() -> AppState {
        AppState::with_session_store(Settings::default(), MemoryStore::shared())
    }

    #[tokio::test]
    async fn protected_calls_need_an_identity() {
        let state = state();

        let (status, Json(body)) = require_identity(&state).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.notices.len(), 1);
        assert_eq!(body.notices[0].title, "Authentication required");

        login(
            State(state.clone()),
            Json(LoginForm {
                email: "farmer@example.com".to_string(),
                password: "secret".to_string(),
            }),
        )
        .await
        .unwrap();

        let identity = require_identity(&state).await.unwrap();
        assert_eq!(identity.email, "farmer@example.com");
        assert!(identity.id.starts_with("user-"));
    }

    #[tokio::test]
    async fn signup_rejects_mismatched_passwords() {
        let (status, Json(body)) = signup(
            State(state()),
            Json(SignupForm {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                password: "one".to_string(),
                confirm_password: "two".to_string(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.notices[0].description, "Passwords do not match");
    }

    #[tokio::test]
    async fn blank_login_is_a_bad_request() {
        let (status, _) = login(
            State(state()),
            Json(LoginForm {
                email: " ".to_string(),
                password: String::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_reports_state_and_clears_on_logout() {
        let state = state();
        let Json(before) = session(State(state.clone())).await;
        assert_eq!(before.state, "unauthenticated");

        state.auth().login("a@b.c", "pw").await.unwrap();
        let Json(during) = session(State(state.clone())).await;
        assert_eq!(during.state, "authenticated");

        logout(State(state.clone())).await.unwrap();
        let Json(after) = session(State(state)).await;
        assert_eq!(after.state, "unauthenticated");
        assert!(after.identity.is_none());
    }

    #[tokio::test]
    async fn logout_reports_storage_failures() {
        let state = AppState::with_session_store(
            Settings::default(),
            Arc::new(UnclearableStore(MemoryStore::new())),
        );
        state.auth().login("a@b.c", "pw").await.unwrap();

        let (status, Json(body)) = logout(State(state.clone())).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.notices[0].title, "Error");
        assert!(state.auth().current_identity().is_some());
    }
}
