use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::{
    admin::{AdminAuthGate, GuardOutcome, RouteGuard},
    auth::AuthCore,
    notify::{Notice, Notifier},
};

pub const LOGIN_PATH: &str = "/login";
pub const ADMIN_LOGIN_PATH: &str = "/admin-login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Public,
    /// Requires a signed-in identity.
    Protected,
    /// Requires the admin flag.
    AdminOnly,
}

const PROTECTED: &[&str] = &["/dashboard", "/farmer-details", "/upload", "/appointments"];
const ADMIN_ONLY: &[&str] = &["/admin-dashboard"];

/// Which gate a view path sits behind. Unknown paths render the public
/// not-found view.
pub fn classify(path: &str) -> Access {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    if ADMIN_ONLY.contains(&path) {
        Access::AdminOnly
    } else if PROTECTED.contains(&path) || path.starts_with("/results/") {
        Access::Protected
    } else {
        Access::Public
    }
}

fn login_required() -> Notice {
    Notice::destructive("Authentication required", "Please log in to access this page")
}

fn admin_required() -> Notice {
    Notice::destructive(
        "Access Denied",
        "You need administrator privileges to access this page",
    )
}

/// Evaluates navigation attempts against the current session state.
///
/// Every call is a fresh access attempt with its own guard, so each refused
/// attempt yields exactly one denial notice.
#[derive(Clone)]
pub struct RouteAccess {
    auth: Arc<AuthCore>,
    admin: Arc<AdminAuthGate>,
    notifier: Arc<dyn Notifier>,
}

impl RouteAccess {
    pub fn new(
        auth: Arc<AuthCore>,
        admin: Arc<AdminAuthGate>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            auth,
            admin,
            notifier,
        }
    }

    pub async fn evaluate(&self, path: &str) -> GuardOutcome {
        let access = classify(path);
        debug!(%path, ?access, "evaluating route access");
        self.authorize(access).await
    }

    pub async fn authorize(&self, access: Access) -> GuardOutcome {
        match access {
            Access::Public => GuardOutcome::RenderChildren,
            Access::Protected => {
                // Rehydration has not finished; render nothing rather than
                // flash the signed-out view.
                if self.auth.is_loading() {
                    return GuardOutcome::RenderNothing;
                }
                let mut guard = RouteGuard::new(LOGIN_PATH, login_required());
                let auth = self.auth.clone();
                guard
                    .check(
                        async move { auth.current_identity().is_some() },
                        self.notifier.as_ref(),
                    )
                    .await
            }
            Access::AdminOnly => {
                let mut guard = RouteGuard::new(ADMIN_LOGIN_PATH, admin_required());
                let admin = self.admin.clone();
                guard
                    .check(async move { admin.is_granted() }, self.notifier.as_ref())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::MockAuthBackend,
        notify::RecordingNotifier,
        session::{MemoryStore, SharedStore},
    };

    struct Fixture {
        auth: Arc<AuthCore>,
        admin: Arc<AdminAuthGate>,
        notices: RecordingNotifier,
        access: RouteAccess,
    }

    fn fixture() -> Fixture {
        let store: SharedStore = MemoryStore::shared();
        let auth = Arc::new(AuthCore::open(store.clone(), Arc::new(MockAuthBackend)));
        let admin = Arc::new(AdminAuthGate::new(MemoryStore::shared()));
        let notices = RecordingNotifier::new();
        let access = RouteAccess::new(auth.clone(), admin.clone(), Arc::new(notices.clone()));
        Fixture {
            auth,
            admin,
            notices,
            access,
        }
    }

    #[test]
    fn paths_are_classified() {
        assert_eq!(classify("/"), Access::Public);
        assert_eq!(classify("/signup"), Access::Public);
        assert_eq!(classify("/upload/"), Access::Protected);
        assert_eq!(classify("/results/latest"), Access::Protected);
        assert_eq!(classify("/admin-dashboard"), Access::AdminOnly);
        assert_eq!(classify("/no-such-page"), Access::Public);
    }

    #[tokio::test]
    async fn each_refused_attempt_notifies_once() {
        let f = fixture();

        let first = f.access.evaluate("/upload").await;
        let second = f.access.evaluate("/dashboard").await;

        assert_eq!(first, GuardOutcome::Redirect(LOGIN_PATH.to_string()));
        assert_eq!(second, first);
        assert_eq!(
            f.notices.titles(),
            vec!["Authentication required", "Authentication required"]
        );
    }

    #[tokio::test]
    async fn signed_in_users_reach_protected_views() {
        let f = fixture();
        f.auth.login("farmer@example.com", "secret").await.unwrap();

        assert_eq!(
            f.access.evaluate("/results/analysis-001").await,
            GuardOutcome::RenderChildren
        );
        assert!(f.notices.snapshot().is_empty());
    }

    #[tokio::test]
    async fn loading_session_renders_nothing_without_notice() {
        let store: SharedStore = MemoryStore::shared();
        let auth = Arc::new(AuthCore::new(store, Arc::new(MockAuthBackend)));
        let notices = RecordingNotifier::new();
        let access = RouteAccess::new(
            auth,
            Arc::new(AdminAuthGate::new(MemoryStore::shared())),
            Arc::new(notices.clone()),
        );

        assert_eq!(access.evaluate("/upload").await, GuardOutcome::RenderNothing);
        assert!(notices.snapshot().is_empty());
    }

    #[tokio::test]
    async fn admin_views_follow_the_admin_flag() {
        let f = fixture();
        assert_eq!(
            f.access.evaluate("/admin-dashboard").await,
            GuardOutcome::Redirect(ADMIN_LOGIN_PATH.to_string())
        );
        assert_eq!(f.notices.titles(), vec!["Access Denied"]);

        f.admin.login("admin", "admin123").unwrap();
        assert_eq!(
            f.access.evaluate("/admin-dashboard").await,
            GuardOutcome::RenderChildren
        );
        assert_eq!(f.notices.snapshot().len(), 1);
    }
}
