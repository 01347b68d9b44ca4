use std::future::Future;

use tracing::debug;

use crate::notify::{Notice, Notifier};

/// Observable phases of a protected view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Denied,
    Granted,
}

/// What the protected view should do right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Still checking: render nothing, not even a placeholder.
    RenderNothing,
    Redirect(String),
    RenderChildren,
}

/// One guard instance per mount of a protected view.
///
/// The access probe may be synchronous or asynchronous; until it resolves the
/// guard stays in `Checking`. A denial emits exactly one notice for the
/// lifetime of the guard no matter how often the outcome is polled.
pub struct RouteGuard {
    state: GuardState,
    redirect_to: String,
    denial: Notice,
    denial_emitted: bool,
}

impl RouteGuard {
    pub fn new(redirect_to: impl Into<String>, denial: Notice) -> Self {
        Self {
            state: GuardState::Checking,
            redirect_to: redirect_to.into(),
            denial,
            denial_emitted: false,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn outcome(&self) -> GuardOutcome {
        match self.state {
            GuardState::Checking => GuardOutcome::RenderNothing,
            GuardState::Denied => GuardOutcome::Redirect(self.redirect_to.clone()),
            GuardState::Granted => GuardOutcome::RenderChildren,
        }
    }

    /// Awaits the access probe and settles the guard.
    pub async fn check<F>(&mut self, probe: F, notifier: &dyn Notifier) -> GuardOutcome
    where
        F: Future<Output = bool>,
    {
        if self.state != GuardState::Checking {
            return self.outcome();
        }
        let granted = probe.await;
        self.resolve(granted, notifier)
    }

    /// Settles the guard with an already-known answer. Once settled, later
    /// calls only report the existing outcome.
    pub fn resolve(&mut self, granted: bool, notifier: &dyn Notifier) -> GuardOutcome {
        if self.state == GuardState::Checking {
            self.state = if granted {
                GuardState::Granted
            } else {
                GuardState::Denied
            };
            debug!(state = ?self.state, redirect = %self.redirect_to, "route guard settled");
        }

        if self.state == GuardState::Denied && !self.denial_emitted {
            self.denial_emitted = true;
            notifier.notify(self.denial.clone());
        }

        self.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;

    fn denial() -> Notice {
        Notice::destructive(
            "Access Denied",
            "You need administrator privileges to access this page",
        )
    }

    #[test]
    fn starts_checking_and_renders_nothing() {
        let guard = RouteGuard::new("/admin-login", denial());
        assert_eq!(guard.state(), GuardState::Checking);
        assert_eq!(guard.outcome(), GuardOutcome::RenderNothing);
    }

    #[test]
    fn denial_redirects_and_notifies_once() {
        let notifier = RecordingNotifier::new();
        let mut guard = RouteGuard::new("/admin-login", denial());

        let first = guard.resolve(false, &notifier);
        let second = guard.resolve(true, &notifier);

        assert_eq!(first, GuardOutcome::Redirect("/admin-login".to_string()));
        assert_eq!(second, first);
        assert_eq!(notifier.titles(), vec!["Access Denied"]);
    }

    #[tokio::test]
    async fn async_probe_grants_without_notice() {
        let notifier = RecordingNotifier::new();
        let mut guard = RouteGuard::new("/admin-login", denial());

        let outcome = guard
            .check(
                async {
                    tokio::task::yield_now().await;
                    true
                },
                &notifier,
            )
            .await;

        assert_eq!(outcome, GuardOutcome::RenderChildren);
        assert_eq!(guard.state(), GuardState::Granted);
        assert!(notifier.snapshot().is_empty());
    }
}
