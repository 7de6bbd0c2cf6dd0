//! User notification fan-out.
//!
//! The engine only emits notifications; delivery (websocket push,
//! email, in-app feed) belongs to the rest of the platform, so it sits
//! behind this trait.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use edumesh_core::UserId;

/// Notification delivery error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// A single emitted notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub user_ids: Vec<UserId>,
    pub event: String,
    pub message: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Captures notifications for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}
