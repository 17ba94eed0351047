//! Fire-and-forget notification fan-out.

use crate::error::CoreError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    BookingExpired,
    QuoteProvided,
    QuoteExpired,
    WorkerAssigned,
    AssignmentAccepted,
    AssignmentRejected,
    JobStarted,
    JobCompleted,
    EarningsCredited,
    WalletRecharged,
    WithdrawalCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub booking_id: Option<i64>,
    pub message: String,
}

impl Notification {
    pub fn new(user_id: i64, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            booking_id: None,
            message: message.into(),
        }
    }

    pub fn for_booking(mut self, booking_id: i64) -> Self {
        self.booking_id = Some(booking_id);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), CoreError>;
}

/// Deliver without letting a failure reach the caller.
pub async fn dispatch(notifier: &dyn Notifier, notification: Notification) {
    let user_id = notification.user_id;
    let kind = notification.kind;
    if let Err(e) = notifier.send(notification).await {
        warn!(user_id, ?kind, error = %e, "Notification dropped");
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), CoreError> {
        info!(
            user_id = notification.user_id,
            kind = ?notification.kind,
            booking_id = notification.booking_id,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Keeps every notification in memory; optionally fails every send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds_for(&self, user_id: i64) -> Vec<NotificationKind> {
        self.sent()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), CoreError> {
        if self.failing {
            return Err(CoreError::ExternalUnavailable("notifier offline".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        Ok(())
    }
}
