//! Real-time push boundary.
//!
//! Publish failures are logged and swallowed by the reconciler: an
//! attendance operation never fails because a socket push did.

use serde::Serialize;
use thiserror::Error;

/// Events consumed by the real-time UI push layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AttendanceEvent {
    SessionStarted {
        session_id: String,
        faculty_id: String,
        subject: String,
        section: String,
        total_students: u32,
    },
    AttendanceMarked {
        session_id: String,
        student_id: String,
        student_name: String,
        present_students: u32,
        absent_students: u32,
        total_students: u32,
    },
    SessionMissed {
        session_id: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget event sink.
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &AttendanceEvent) -> Result<(), NotifyError>;
}

/// Sink that emits events to the tracing log. Stands in for the socket
/// transport, which lives outside this service.
pub struct LogSink;

impl NotificationSink for LogSink {
    async fn publish(&self, event: &AttendanceEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event).map_err(|e| NotifyError(e.to_string()))?;
        tracing::info!(%payload, "attendance event");
        Ok(())
    }
}
