use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

/// Visual weight of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeVariant {
    Info,
    Destructive,
}

/// A transient, user-visible message (toast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NoticeVariant::Info,
        }
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NoticeVariant::Destructive,
        }
    }
}

/// Sink for notices raised by the core.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log. Used when nobody is collecting them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.variant {
            NoticeVariant::Info => info!(title = %notice.title, "{}", notice.description),
            NoticeVariant::Destructive => warn!(title = %notice.title, "{}", notice.description),
        }
    }
}

/// Keeps every notice in order so callers can drain and echo them.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn drain(&self) -> Vec<Notice> {
        let mut guard = self
            .notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }

    #[cfg(test)]
    pub fn titles(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .map(|notice| notice.title)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        TracingNotifier.notify(notice.clone());
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_keeps_order_and_drains() {
        let notifier = RecordingNotifier::new();
        notifier.notify(Notice::info("first", "a"));
        notifier.notify(Notice::destructive("second", "b"));

        assert_eq!(notifier.titles(), vec!["first", "second"]);
        let drained = notifier.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].variant, NoticeVariant::Destructive);
        assert!(notifier.snapshot().is_empty());
    }
}
