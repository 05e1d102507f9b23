//! Document-store boundary: session load/save and roster lookups.
//!
//! `save` is compare-and-swap on the session's revision so concurrent
//! read-modify-write sequences cannot lose an increment; callers re-read
//! and re-apply on [`StoreError::Conflict`].

use std::collections::HashMap;

use chrono::NaiveDate;
use rollcall_core::{AttendanceSession, SessionKey, SessionType, Student};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic save lost the race; the document changed underneath us.
    #[error("session {id} was modified concurrently (expected revision {expected})")]
    Conflict { id: String, expected: u64 },
    #[error("session {0} already exists")]
    AlreadyExists(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Report-query filters. `faculty_id` is mandatory; everything else
/// narrows the result set.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub faculty_id: String,
    pub subject: Option<String>,
    pub section: Option<String>,
    pub session_type: Option<SessionType>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl SessionFilter {
    pub fn matches(&self, session: &AttendanceSession) -> bool {
        session.faculty_id == self.faculty_id
            && self.subject.as_deref().map_or(true, |v| session.subject == v)
            && self.section.as_deref().map_or(true, |v| session.section == v)
            && self
                .session_type
                .map_or(true, |v| session.session_type == v)
            && self.from.map_or(true, |d| session.date >= d)
            && self.to.map_or(true, |d| session.date <= d)
    }
}

/// CRUD over attendance session documents.
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<AttendanceSession>, StoreError>;

    /// Look up a session by natural key. When both a missed and an active
    /// session exist for the key, the active one wins.
    async fn find_by_key(&self, key: &SessionKey) -> Result<Option<AttendanceSession>, StoreError>;

    /// Sessions matching `filter`, most recent first (by date, then by
    /// creation time).
    async fn find_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<AttendanceSession>, StoreError>;

    async fn insert(&self, session: AttendanceSession) -> Result<(), StoreError>;

    /// Persist `session` iff the stored revision still equals
    /// `session.revision`; the stored copy gets `revision + 1`, which is
    /// returned.
    async fn save(&self, session: &AttendanceSession) -> Result<u64, StoreError>;
}

/// Roster lookups against the student collection.
pub trait RosterStore: Send + Sync {
    async fn load_roster(
        &self,
        subject: &str,
        section: &str,
        faculty_id: &str,
    ) -> Result<Vec<Student>, StoreError>;
}

/// In-memory document store used by tests and the demo wiring. The
/// production deployment points these traits at the ERP's document
/// database instead.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, AttendanceSession>>,
    students: RwLock<Vec<Student>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_student(&self, student: Student) {
        self.students.write().await.push(student);
    }

    pub async fn remove_student(&self, student_id: &str) {
        self.students.write().await.retain(|s| s.id != student_id);
    }
}

impl SessionStore for MemoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<AttendanceSession>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn find_by_key(&self, key: &SessionKey) -> Result<Option<AttendanceSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut found = None;
        for session in sessions.values() {
            if session.key() == *key {
                if !session.is_missed() {
                    return Ok(Some(session.clone()));
                }
                found = Some(session.clone());
            }
        }
        Ok(found)
    }

    async fn find_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<AttendanceSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matched: Vec<AttendanceSession> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(matched)
    }

    async fn insert(&self, session: AttendanceSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists(session.id));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn save(&self, session: &AttendanceSession) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::Unavailable(format!("session {} vanished", session.id)))?;

        if stored.revision != session.revision {
            return Err(StoreError::Conflict {
                id: session.id.clone(),
                expected: session.revision,
            });
        }

        let mut updated = session.clone();
        updated.revision = session.revision + 1;
        let revision = updated.revision;
        *stored = updated;
        Ok(revision)
    }
}

impl RosterStore for MemoryStore {
    async fn load_roster(
        &self,
        subject: &str,
        section: &str,
        faculty_id: &str,
    ) -> Result<Vec<Student>, StoreError> {
        Ok(self
            .students
            .read()
            .await
            .iter()
            .filter(|s| s.is_enrolled_in(subject, section, faculty_id))
            .cloned()
            .collect())
    }
}
