//! The stateful core: session creation, face-match marking, read-time
//! count reconciliation, and missed-session handling.
//!
//! Every mutating operation re-reads the session document immediately
//! before writing and re-applies on a compare-and-swap conflict, so
//! concurrent marks against the same session never lose an increment.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{
    AbsentEntry, AttendanceRecord, AttendanceSession, CosineMatcher, Embedding, Location,
    MarkOutcome, Matcher, PresentEntry, SessionError, SessionKey, SessionState, SessionType,
};
use serde::Serialize;
use thiserror::Error;

use crate::embed::{EmbedError, FaceEmbedder};
use crate::guard::{GuardDecision, GuardKey, SessionCreationGuard};
use crate::notify::{AttendanceEvent, NotificationSink, NotifyError};
use crate::store::{RosterStore, SessionFilter, SessionStore, StoreError};

/// Bound on optimistic-save retries per operation. Every retry implies a
/// concurrent writer committed, so contention deeper than this means the
/// store is misbehaving.
const SAVE_RETRY_LIMIT: usize = 16;

/// Cap on sessions returned per report query.
const REPORT_SESSION_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("{0}")]
    Validation(String),
    #[error("please wait before creating another session (retry in {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("no students enrolled in {subject}/{section}; register students first")]
    NoStudentsEnrolled { subject: String, section: String },
    #[error("attendance session {0} not found")]
    SessionNotFound(String),
    #[error("session belongs to another faculty")]
    Forbidden,
    #[error("face does not match any enrolled student")]
    NoMatchFound,
    #[error(
        "student {student_id} is not part of this session; restart the session to pick up current enrollment"
    )]
    StudentNotInSession { student_id: String },
    #[error("session already has {present} present student(s); cannot mark missed")]
    CannotMarkMissed { present: u32 },
    #[error("session is marked missed and no longer accepts attendance")]
    SessionMissed,
    #[error("embedding extraction failed: {0}")]
    Embedding(#[from] EmbedError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AttendanceError {
    /// Expected outcomes of normal operation. Reported to the caller with
    /// hint text, never logged at elevated severity. An unreachable
    /// collaborator is the exception, not a domain outcome.
    fn is_domain(&self) -> bool {
        !matches!(
            self,
            AttendanceError::Store(_) | AttendanceError::Embedding(EmbedError::Unavailable(_))
        )
    }
}

fn log_outcome(operation: &str, err: &AttendanceError) {
    if err.is_domain() {
        tracing::debug!(operation, error = %err, "reported to caller");
    } else {
        tracing::warn!(operation, error = %err, "collaborator failure");
    }
}

/// Request to start (or idempotently re-fetch) today's session.
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
    pub faculty_id: String,
    pub subject: String,
    pub section: String,
    pub session_type: SessionType,
    pub hours: Vec<u32>,
    pub location: Option<Location>,
}

/// Per-student echo returned by `start_session`.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEcho {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    pub is_present: bool,
    /// Only known when the roster was freshly loaded (new sessions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_face_data: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionOutcome {
    pub session_id: String,
    pub total_students: u32,
    pub already_existed: bool,
    pub students: Vec<RosterEcho>,
}

#[derive(Debug, Serialize)]
pub struct MarkAttendanceOutcome {
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub confidence: f32,
    /// True for a duplicate detection absorbed as a no-op.
    pub already_marked: bool,
    pub present_students: u32,
    pub absent_students: u32,
    pub total_students: u32,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub subject: String,
    pub section: String,
    pub session_type: SessionType,
    pub hours: Vec<u32>,
    pub date: NaiveDate,
    pub total_students: u32,
    pub present_students: u32,
    pub absent_students: u32,
    pub attendance_percentage: u32,
    pub is_missed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub present: Vec<PresentEntry>,
    pub absent: Vec<AbsentEntry>,
    /// Raw record list kept for report exports.
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone)]
pub struct MarkMissedRequest {
    pub faculty_id: String,
    pub subject: String,
    pub section: String,
    pub session_type: SessionType,
    pub hours: Vec<u32>,
    pub date: NaiveDate,
    pub reason: String,
    pub note: Option<String>,
}

/// Per-student aggregate across every held session of a class.
#[derive(Debug, Serialize)]
pub struct StudentAttendanceSummary {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    pub total_sessions: u32,
    pub present_sessions: u32,
    pub absent_sessions: u32,
    pub attendance_percentage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_present_date: Option<NaiveDate>,
    /// Hour slots of the most recent session the student attended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_present_hours: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct ClassAttendanceReport {
    pub students: Vec<StudentAttendanceSummary>,
    pub total_sessions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

/// Optional narrowing for `session_reports`; an empty query returns the
/// faculty's full (capped) history.
#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    pub subject: Option<String>,
    pub section: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// One session in a report: the summary plus present/absent lists built
/// from the session's own records.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub present: Vec<PresentEntry>,
    pub absent: Vec<AbsentEntry>,
}

fn summarize(session: &AttendanceSession) -> SessionSummary {
    let missed_reason = match &session.state {
        SessionState::Missed { reason, .. } => Some(reason.clone()),
        SessionState::Active => None,
    };
    SessionSummary {
        session_id: session.id.clone(),
        subject: session.subject.clone(),
        section: session.section.clone(),
        session_type: session.session_type,
        hours: session.hours.clone(),
        date: session.date,
        total_students: session.total_students,
        present_students: session.present_students,
        absent_students: session.absent_students,
        attendance_percentage: session.attendance_percentage(),
        is_missed: session.is_missed(),
        missed_reason,
        location: session.location.clone(),
        created_at: session.created_at,
        updated_at: session.updated_at,
    }
}

/// Clone-safe handle around the store, guard, and notification sink.
/// Generic over the match strategy so an ANN-backed matcher can replace
/// the linear scan without touching the operations.
pub struct Reconciler<S, N, M = CosineMatcher> {
    store: Arc<S>,
    sink: Arc<N>,
    guard: Arc<SessionCreationGuard>,
    matcher: M,
    threshold: f32,
}

impl<S, N, M: Clone> Clone for Reconciler<S, N, M> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            guard: Arc::clone(&self.guard),
            matcher: self.matcher.clone(),
            threshold: self.threshold,
        }
    }
}

impl<S, N> Reconciler<S, N>
where
    S: SessionStore + RosterStore,
    N: NotificationSink,
{
    pub fn new(store: Arc<S>, sink: Arc<N>, guard: Arc<SessionCreationGuard>, threshold: f32) -> Self {
        Self::with_matcher(store, sink, guard, CosineMatcher, threshold)
    }
}

impl<S, N, M> Reconciler<S, N, M>
where
    S: SessionStore + RosterStore,
    N: NotificationSink,
    M: Matcher,
{
    pub fn with_matcher(
        store: Arc<S>,
        sink: Arc<N>,
        guard: Arc<SessionCreationGuard>,
        matcher: M,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            sink,
            guard,
            matcher,
            threshold,
        }
    }

    /// Fire-and-forget publish. Failures never affect the operation that
    /// triggered the event.
    async fn publish(&self, event: AttendanceEvent) {
        if let Err(NotifyError(reason)) = self.sink.publish(&event).await {
            tracing::warn!(%reason, "event publish failed; continuing");
        }
    }

    /// Start today's session for a class, or return the existing one.
    ///
    /// The idempotency lookup runs before the creation guard so a retried
    /// "start" within the cooldown still resolves to the existing session
    /// instead of a rate-limit rejection.
    pub async fn start_session(
        &self,
        req: StartSessionRequest,
        today: NaiveDate,
    ) -> Result<StartSessionOutcome, AttendanceError> {
        let result = self.start_session_inner(req, today).await;
        if let Err(err) = &result {
            log_outcome("start_session", err);
        }
        result
    }

    async fn start_session_inner(
        &self,
        req: StartSessionRequest,
        today: NaiveDate,
    ) -> Result<StartSessionOutcome, AttendanceError> {
        if req.faculty_id.trim().is_empty() {
            return Err(AttendanceError::Validation("faculty id is required".into()));
        }
        if req.subject.trim().is_empty() || req.section.trim().is_empty() {
            return Err(AttendanceError::Validation(
                "subject and section are required".into(),
            ));
        }
        if req.hours.is_empty() {
            return Err(AttendanceError::Validation(
                "at least one hour slot is required".into(),
            ));
        }

        let key = SessionKey {
            faculty_id: req.faculty_id.clone(),
            subject: req.subject.clone(),
            section: req.section.clone(),
            session_type: req.session_type,
            date: today,
        };

        if let Some(existing) = self.store.find_by_key(&key).await? {
            if !existing.is_missed() {
                tracing::debug!(session = %existing.id, "session already exists for today");
                let students = existing
                    .records
                    .iter()
                    .map(|r| RosterEcho {
                        student_id: r.student_id.clone(),
                        name: r.student_name.clone(),
                        roll_number: r.roll_number.clone(),
                        is_present: r.is_present,
                        has_face_data: None,
                    })
                    .collect();
                return Ok(StartSessionOutcome {
                    session_id: existing.id,
                    total_students: existing.total_students,
                    already_existed: true,
                    students,
                });
            }
        }

        match self.guard.check(GuardKey {
            faculty_id: req.faculty_id.clone(),
            subject: req.subject.clone(),
            section: req.section.clone(),
        }) {
            GuardDecision::Allowed => {}
            GuardDecision::Throttled { retry_after_secs } => {
                return Err(AttendanceError::RateLimited { retry_after_secs });
            }
        }

        let roster = self
            .store
            .load_roster(&req.subject, &req.section, &req.faculty_id)
            .await?;
        if roster.is_empty() {
            return Err(AttendanceError::NoStudentsEnrolled {
                subject: req.subject,
                section: req.section,
            });
        }

        let session = AttendanceSession::new(key, req.hours, req.location, &roster, Utc::now());
        let students = roster
            .iter()
            .map(|s| RosterEcho {
                student_id: s.id.clone(),
                name: s.name.clone(),
                roll_number: s.roll_number.clone(),
                is_present: false,
                has_face_data: Some(s.has_face_data()),
            })
            .collect();
        let outcome = StartSessionOutcome {
            session_id: session.id.clone(),
            total_students: session.total_students,
            already_existed: false,
            students,
        };

        self.store.insert(session.clone()).await?;
        tracing::info!(
            session = %session.id,
            subject = %session.subject,
            section = %session.section,
            total = session.total_students,
            "attendance session started"
        );
        self.publish(AttendanceEvent::SessionStarted {
            session_id: session.id,
            faculty_id: session.faculty_id,
            subject: session.subject,
            section: session.section,
            total_students: session.total_students,
        })
        .await;

        Ok(outcome)
    }

    /// Resolve a probe embedding against the current roster and mark the
    /// matched student present.
    pub async fn mark_attendance(
        &self,
        faculty_id: &str,
        session_id: &str,
        probe: &Embedding,
    ) -> Result<MarkAttendanceOutcome, AttendanceError> {
        let result = self.mark_attendance_inner(faculty_id, session_id, probe).await;
        if let Err(err) = &result {
            log_outcome("mark_attendance", err);
        }
        result
    }

    /// Convenience wrapper: extract the embedding first, then mark.
    pub async fn mark_attendance_from_image<E: FaceEmbedder>(
        &self,
        embedder: &E,
        faculty_id: &str,
        session_id: &str,
        image_jpeg: &[u8],
    ) -> Result<MarkAttendanceOutcome, AttendanceError> {
        let probe = match embedder.embed(image_jpeg).await {
            Ok(probe) => probe,
            Err(err) => {
                let err = AttendanceError::from(err);
                log_outcome("mark_attendance", &err);
                return Err(err);
            }
        };
        self.mark_attendance(faculty_id, session_id, &probe).await
    }

    async fn mark_attendance_inner(
        &self,
        faculty_id: &str,
        session_id: &str,
        probe: &Embedding,
    ) -> Result<MarkAttendanceOutcome, AttendanceError> {
        for attempt in 0..SAVE_RETRY_LIMIT {
            // Re-read immediately before the write; stale copies are how
            // increments get lost.
            let mut session = self
                .store
                .load(session_id)
                .await?
                .ok_or_else(|| AttendanceError::SessionNotFound(session_id.to_string()))?;

            if session.faculty_id != faculty_id {
                return Err(AttendanceError::Forbidden);
            }
            if session.is_missed() {
                return Err(AttendanceError::SessionMissed);
            }

            // Fresh roster, not the session's frozen record list: a student
            // may have enrolled after the session was created.
            let roster = self
                .store
                .load_roster(&session.subject, &session.section, &session.faculty_id)
                .await?;

            let matched = self
                .matcher
                .find_best(probe, &roster, self.threshold)
                .ok_or(AttendanceError::NoMatchFound)?;

            let now = Utc::now();
            if session.record(&matched.student_id).is_none() {
                match roster.iter().find(|s| s.id == matched.student_id) {
                    Some(student) => {
                        tracing::info!(
                            session = %session.id,
                            student = %student.id,
                            "enrolled after session creation; admitting to session"
                        );
                        session.admit_late_enrollee(student, now);
                    }
                    None => {
                        return Err(AttendanceError::StudentNotInSession {
                            student_id: matched.student_id,
                        })
                    }
                }
            }

            let outcome = session
                .mark_present(&matched.student_id, matched.similarity, now)
                .map_err(|err| match err {
                    SessionError::AlreadyMissed => AttendanceError::SessionMissed,
                    SessionError::NoRecord(student_id) => {
                        AttendanceError::StudentNotInSession { student_id }
                    }
                    other => AttendanceError::Validation(other.to_string()),
                })?;

            let record = session
                .record(&matched.student_id)
                .cloned()
                .ok_or_else(|| AttendanceError::StudentNotInSession {
                    student_id: matched.student_id.clone(),
                })?;

            match outcome {
                MarkOutcome::AlreadyPresent => {
                    tracing::debug!(
                        session = %session.id,
                        student = %record.student_id,
                        "duplicate detection; already marked present"
                    );
                    return Ok(MarkAttendanceOutcome {
                        student_id: record.student_id,
                        student_name: record.student_name,
                        roll_number: record.roll_number,
                        confidence: record.confidence.unwrap_or(0.0),
                        already_marked: true,
                        present_students: session.present_students,
                        absent_students: session.absent_students,
                        total_students: session.total_students,
                    });
                }
                MarkOutcome::Marked { confidence } => match self.store.save(&session).await {
                    Ok(_) => {
                        tracing::info!(
                            session = %session.id,
                            student = %record.student_id,
                            confidence,
                            present = session.present_students,
                            "attendance marked"
                        );
                        self.publish(AttendanceEvent::AttendanceMarked {
                            session_id: session.id.clone(),
                            student_id: record.student_id.clone(),
                            student_name: record.student_name.clone(),
                            present_students: session.present_students,
                            absent_students: session.absent_students,
                            total_students: session.total_students,
                        })
                        .await;
                        return Ok(MarkAttendanceOutcome {
                            student_id: record.student_id,
                            student_name: record.student_name,
                            roll_number: record.roll_number,
                            confidence,
                            already_marked: false,
                            present_students: session.present_students,
                            absent_students: session.absent_students,
                            total_students: session.total_students,
                        });
                    }
                    Err(StoreError::Conflict { .. }) => {
                        tracing::debug!(session = %session.id, attempt, "concurrent update; retrying");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
            }
        }

        Err(AttendanceError::Store(StoreError::Unavailable(
            "save retry limit exhausted".into(),
        )))
    }

    /// Fetch a session for display, reconciling cached counts against the
    /// current roster first (lazy self-healing; persisted when changed).
    pub async fn session_detail(
        &self,
        faculty_id: &str,
        session_id: &str,
    ) -> Result<SessionDetail, AttendanceError> {
        let result = self.session_detail_inner(faculty_id, session_id).await;
        if let Err(err) = &result {
            log_outcome("session_detail", err);
        }
        result
    }

    async fn session_detail_inner(
        &self,
        faculty_id: &str,
        session_id: &str,
    ) -> Result<SessionDetail, AttendanceError> {
        for _ in 0..SAVE_RETRY_LIMIT {
            let mut session = self
                .store
                .load(session_id)
                .await?
                .ok_or_else(|| AttendanceError::SessionNotFound(session_id.to_string()))?;

            if session.faculty_id != faculty_id {
                return Err(AttendanceError::Forbidden);
            }

            let roster = self
                .store
                .load_roster(&session.subject, &session.section, &session.faculty_id)
                .await?;

            if session.reconcile(&roster, Utc::now()) {
                match self.store.save(&session).await {
                    Ok(_) => {}
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(err) => return Err(err.into()),
                }
            }

            return Ok(SessionDetail {
                summary: summarize(&session),
                present: session.present_entries(),
                absent: session.absent_entries(&roster),
                records: session.records.clone(),
            });
        }

        Err(AttendanceError::Store(StoreError::Unavailable(
            "reconcile retry limit exhausted".into(),
        )))
    }

    /// Declare a scheduled session missed, or create it directly in the
    /// missed state so reports show the gap.
    pub async fn mark_missed(
        &self,
        req: MarkMissedRequest,
    ) -> Result<SessionSummary, AttendanceError> {
        let result = self.mark_missed_inner(req).await;
        if let Err(err) = &result {
            log_outcome("mark_missed", err);
        }
        result
    }

    async fn mark_missed_inner(
        &self,
        req: MarkMissedRequest,
    ) -> Result<SessionSummary, AttendanceError> {
        if req.faculty_id.trim().is_empty() {
            return Err(AttendanceError::Validation("faculty id is required".into()));
        }
        if req.reason.trim().is_empty() {
            return Err(AttendanceError::Validation("a reason is required".into()));
        }
        if req.hours.is_empty() {
            return Err(AttendanceError::Validation(
                "at least one hour slot is required".into(),
            ));
        }
        if req.subject.trim().is_empty() || req.section.trim().is_empty() {
            return Err(AttendanceError::Validation(
                "subject and section are required".into(),
            ));
        }

        let key = SessionKey {
            faculty_id: req.faculty_id.clone(),
            subject: req.subject.clone(),
            section: req.section.clone(),
            session_type: req.session_type,
            date: req.date,
        };

        for _ in 0..SAVE_RETRY_LIMIT {
            match self.store.find_by_key(&key).await? {
                Some(mut session) if !session.is_missed() => {
                    session
                        .mark_missed(req.reason.clone(), req.note.clone(), Utc::now())
                        .map_err(|err| match err {
                            SessionError::PresentStudentsExist { present } => {
                                AttendanceError::CannotMarkMissed { present }
                            }
                            other => AttendanceError::Validation(other.to_string()),
                        })?;

                    match self.store.save(&session).await {
                        Ok(_) => {
                            tracing::info!(session = %session.id, reason = %req.reason, "session marked missed");
                            self.publish(AttendanceEvent::SessionMissed {
                                session_id: session.id.clone(),
                                reason: req.reason.clone(),
                            })
                            .await;
                            return Ok(summarize(&session));
                        }
                        Err(StoreError::Conflict { .. }) => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                Some(session) => {
                    // Already missed for this key: repeatable declaration.
                    tracing::debug!(session = %session.id, "session already marked missed");
                    return Ok(summarize(&session));
                }
                None => {
                    // No session was ever started. Snapshot the roster as
                    // all-absent (an empty roster still yields a 0/0/0
                    // entry) so the day is reportable.
                    let roster = self
                        .store
                        .load_roster(&req.subject, &req.section, &req.faculty_id)
                        .await?;
                    let session = AttendanceSession::new_missed(
                        key.clone(),
                        req.hours.clone(),
                        &roster,
                        req.reason.clone(),
                        req.note.clone(),
                        Utc::now(),
                    );
                    self.store.insert(session.clone()).await?;
                    tracing::info!(session = %session.id, reason = %req.reason, "missed session recorded");
                    self.publish(AttendanceEvent::SessionMissed {
                        session_id: session.id.clone(),
                        reason: req.reason.clone(),
                    })
                    .await;
                    return Ok(summarize(&session));
                }
            }
        }

        Err(AttendanceError::Store(StoreError::Unavailable(
            "save retry limit exhausted".into(),
        )))
    }

    /// Set or replace the session's reported location (owner only).
    pub async fn update_location(
        &self,
        faculty_id: &str,
        session_id: &str,
        location: Location,
    ) -> Result<Location, AttendanceError> {
        for _ in 0..SAVE_RETRY_LIMIT {
            let mut session = self
                .store
                .load(session_id)
                .await?
                .ok_or_else(|| AttendanceError::SessionNotFound(session_id.to_string()))?;

            if session.faculty_id != faculty_id {
                return Err(AttendanceError::Forbidden);
            }

            session.location = Some(location.clone());
            session.updated_at = Utc::now();

            match self.store.save(&session).await {
                Ok(_) => return Ok(location),
                Err(StoreError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(AttendanceError::Store(StoreError::Unavailable(
            "save retry limit exhausted".into(),
        )))
    }

    /// Per-student attendance aggregates for one class. Missed sessions
    /// are excluded: a cancelled class should not count against anyone.
    pub async fn student_attendance(
        &self,
        faculty_id: &str,
        subject: &str,
        section: &str,
        session_type: SessionType,
    ) -> Result<ClassAttendanceReport, AttendanceError> {
        let result = self
            .student_attendance_inner(faculty_id, subject, section, session_type)
            .await;
        if let Err(err) = &result {
            log_outcome("student_attendance", err);
        }
        result
    }

    async fn student_attendance_inner(
        &self,
        faculty_id: &str,
        subject: &str,
        section: &str,
        session_type: SessionType,
    ) -> Result<ClassAttendanceReport, AttendanceError> {
        if faculty_id.trim().is_empty() {
            return Err(AttendanceError::Validation("faculty id is required".into()));
        }
        if subject.trim().is_empty() || section.trim().is_empty() {
            return Err(AttendanceError::Validation(
                "subject and section are required".into(),
            ));
        }

        let filter = SessionFilter {
            faculty_id: faculty_id.to_string(),
            subject: Some(subject.to_string()),
            section: Some(section.to_string()),
            session_type: Some(session_type),
            from: None,
            to: None,
        };
        let mut sessions = self.store.find_sessions(&filter).await?;
        sessions.retain(|s| !s.is_missed());

        let roster = self.store.load_roster(subject, section, faculty_id).await?;

        let students = roster
            .iter()
            .map(|student| {
                let mut present_sessions = 0u32;
                let mut last_present: Option<(NaiveDate, Vec<u32>)> = None;

                // Sessions arrive newest first, so the first present hit
                // is the student's most recent attendance.
                for session in &sessions {
                    let is_present = session
                        .record(&student.id)
                        .map_or(false, |r| r.is_present);
                    if is_present {
                        present_sessions += 1;
                        if last_present.is_none() {
                            last_present = Some((session.date, session.hours.clone()));
                        }
                    }
                }

                let total_sessions = sessions.len() as u32;
                let attendance_percentage = if total_sessions == 0 {
                    0
                } else {
                    ((present_sessions as f64 / total_sessions as f64) * 100.0).round() as u32
                };
                let (last_present_date, last_present_hours) = match last_present {
                    Some((date, hours)) => (Some(date), Some(hours)),
                    None => (None, None),
                };

                StudentAttendanceSummary {
                    student_id: student.id.clone(),
                    name: student.name.clone(),
                    roll_number: student.roll_number.clone(),
                    total_sessions,
                    present_sessions,
                    absent_sessions: total_sessions - present_sessions,
                    attendance_percentage,
                    last_present_date,
                    last_present_hours,
                }
            })
            .collect();

        let date_range = match (sessions.last(), sessions.first()) {
            (Some(oldest), Some(newest)) => Some(DateRange {
                from: oldest.date,
                to: newest.date,
            }),
            _ => None,
        };

        Ok(ClassAttendanceReport {
            students,
            total_sessions: sessions.len() as u32,
            date_range,
        })
    }

    /// Session history for a faculty, optionally narrowed by class and
    /// date range. Newest first, capped at [`REPORT_SESSION_LIMIT`].
    pub async fn session_reports(
        &self,
        faculty_id: &str,
        query: ReportQuery,
    ) -> Result<Vec<SessionReport>, AttendanceError> {
        let result = self.session_reports_inner(faculty_id, query).await;
        if let Err(err) = &result {
            log_outcome("session_reports", err);
        }
        result
    }

    async fn session_reports_inner(
        &self,
        faculty_id: &str,
        query: ReportQuery,
    ) -> Result<Vec<SessionReport>, AttendanceError> {
        if faculty_id.trim().is_empty() {
            return Err(AttendanceError::Validation("faculty id is required".into()));
        }

        let filter = SessionFilter {
            faculty_id: faculty_id.to_string(),
            subject: query.subject,
            section: query.section,
            session_type: None,
            from: query.from,
            to: query.to,
        };
        let mut sessions = self.store.find_sessions(&filter).await?;
        sessions.truncate(REPORT_SESSION_LIMIT);

        Ok(sessions
            .into_iter()
            .map(|session| {
                // Records-only view; the per-session detail endpoint is
                // the roster-reconciled one. With no roster, every
                // unmarked record lands in the absent list as-is.
                let present = session.present_entries();
                let absent = session.absent_entries(&[]);
                SessionReport {
                    summary: summarize(&session),
                    present,
                    absent,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::store::MemoryStore;
    use rollcall_core::{Enrollment, MatchResult, Student, FACE_MATCH_THRESHOLD};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        events: Mutex<Vec<AttendanceEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<AttendanceEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl NotificationSink for RecordingSink {
        async fn publish(&self, event: &AttendanceEvent) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl NotificationSink for FailingSink {
        async fn publish(&self, _event: &AttendanceEvent) -> Result<(), NotifyError> {
            Err(NotifyError("socket down".into()))
        }
    }

    struct FixedEmbedder(Embedding);

    impl FaceEmbedder for FixedEmbedder {
        async fn embed(&self, _image: &[u8]) -> Result<Embedding, EmbedError> {
            Ok(self.0.clone())
        }
    }

    struct DownEmbedder;

    impl FaceEmbedder for DownEmbedder {
        async fn embed(&self, _image: &[u8]) -> Result<Embedding, EmbedError> {
            Err(EmbedError::Unavailable("connection refused".into()))
        }
    }

    fn basis(dims: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[axis] = 1.0;
        v
    }

    fn student(id: &str, dims: usize, axis: usize) -> Student {
        Student {
            id: id.into(),
            name: format!("Student {id}"),
            roll_number: format!("R-{id}"),
            embeddings: vec![Embedding::new(basis(dims, axis))],
            face_descriptor: None,
            enrollments: vec![Enrollment {
                subject: "CS101".into(),
                section: "A".into(),
                faculty_id: "f1".into(),
            }],
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn start_request() -> StartSessionRequest {
        StartSessionRequest {
            faculty_id: "f1".into(),
            subject: "CS101".into(),
            section: "A".into(),
            session_type: SessionType::Lecture,
            hours: vec![1, 2],
            location: None,
        }
    }

    fn missed_request(reason: &str) -> MarkMissedRequest {
        MarkMissedRequest {
            faculty_id: "f1".into(),
            subject: "CS101".into(),
            section: "A".into(),
            session_type: SessionType::Lecture,
            hours: vec![1, 2],
            date: today(),
            reason: reason.into(),
            note: None,
        }
    }

    /// Store seeded with students s0..s{n-1}, each embedded on its own
    /// axis of an (n + 2)-dimensional space so probes are unambiguous.
    async fn setup(
        n: usize,
    ) -> (
        Reconciler<MemoryStore, RecordingSink>,
        Arc<MemoryStore>,
        Arc<RecordingSink>,
    ) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            store.add_student(student(&format!("s{i}"), n + 2, i)).await;
        }
        let sink = Arc::new(RecordingSink::new());
        let guard = Arc::new(SessionCreationGuard::new(Duration::from_millis(1000)));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            guard,
            FACE_MATCH_THRESHOLD,
        );
        (reconciler, store, sink)
    }

    #[tokio::test]
    async fn test_start_session_creates_all_absent() {
        let (r, store, sink) = setup(3).await;

        let out = r.start_session(start_request(), today()).await.unwrap();
        assert_eq!(out.total_students, 3);
        assert!(!out.already_existed);
        assert!(out
            .students
            .iter()
            .all(|s| !s.is_present && s.has_face_data == Some(true)));

        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.present_students, 0);
        assert_eq!(session.absent_students, 3);
        assert!(matches!(
            sink.events().as_slice(),
            [AttendanceEvent::SessionStarted { .. }]
        ));
    }

    #[tokio::test]
    async fn test_start_session_idempotent_same_day() {
        let (r, _store, sink) = setup(2).await;

        let first = r.start_session(start_request(), today()).await.unwrap();
        // Within the cooldown window, yet the existing session is returned
        // rather than a rate-limit rejection
        let second = r.start_session(start_request(), today()).await.unwrap();

        assert!(second.already_existed);
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_start_session_rate_limited_after_failed_creation() {
        let (r, _store, _sink) = setup(0).await;

        // Roster empty: creation fails, but the guard timestamp was taken
        let err = r.start_session(start_request(), today()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::NoStudentsEnrolled { .. }));

        let err = r.start_session(start_request(), today()).await.unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::RateLimited { retry_after_secs: 1 }
        ));
    }

    #[tokio::test]
    async fn test_start_session_validation() {
        let (r, _store, _sink) = setup(1).await;
        let mut req = start_request();
        req.subject.clear();
        assert!(matches!(
            r.start_session(req, today()).await,
            Err(AttendanceError::Validation(_))
        ));

        let mut req = start_request();
        req.hours.clear();
        assert!(matches!(
            r.start_session(req, today()).await,
            Err(AttendanceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_attendance_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        store.add_student(student("s1", 3, 0)).await;
        store.add_student(student("s2", 3, 1)).await;
        let sink = Arc::new(RecordingSink::new());
        let guard = Arc::new(SessionCreationGuard::new(Duration::from_millis(1000)));
        let r = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            guard,
            FACE_MATCH_THRESHOLD,
        );

        let out = r.start_session(start_request(), today()).await.unwrap();
        assert_eq!(out.total_students, 2);

        let probe = Embedding::new(vec![0.99, 0.01, 0.0]);
        let m = r.mark_attendance("f1", &out.session_id, &probe).await.unwrap();
        assert_eq!(m.student_id, "s1");
        assert!(!m.already_marked);
        assert!(m.confidence > 0.99 && m.confidence <= 1.0);
        assert_eq!(
            (m.present_students, m.absent_students, m.total_students),
            (1, 1, 2)
        );

        // Duplicate detection from the camera polling loop
        let again = r.mark_attendance("f1", &out.session_id, &probe).await.unwrap();
        assert!(again.already_marked);
        assert_eq!(again.present_students, 1);

        // No candidate clears the threshold
        let err = r
            .mark_attendance("f1", &out.session_id, &Embedding::new(vec![0.0, 0.0, 1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::NoMatchFound));

        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.present_students, 1);
        assert_eq!(
            session.total_students,
            session.present_students + session.absent_students
        );

        let marked_events = sink
            .events()
            .iter()
            .filter(|e| matches!(e, AttendanceEvent::AttendanceMarked { .. }))
            .count();
        assert_eq!(marked_events, 1);
    }

    #[tokio::test]
    async fn test_mark_attendance_wrong_faculty() {
        let (r, _store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();

        let err = r
            .mark_attendance("f2", &out.session_id, &Embedding::new(basis(4, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::Forbidden));
    }

    #[tokio::test]
    async fn test_mark_attendance_session_not_found() {
        let (r, _store, _sink) = setup(1).await;
        let err = r
            .mark_attendance("f1", "nope", &Embedding::new(basis(3, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_attendance_late_enrollment() {
        let (r, store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();
        assert_eq!(out.total_students, 2);

        // s9 enrolls after the session was created
        store.add_student(student("s9", 4, 2)).await;

        let m = r
            .mark_attendance("f1", &out.session_id, &Embedding::new(basis(4, 2)))
            .await
            .unwrap();
        assert_eq!(m.student_id, "s9");
        assert!(!m.already_marked);
        assert_eq!(
            (m.total_students, m.present_students, m.absent_students),
            (3, 1, 2)
        );

        // Add-then-mark landed as one write: no enrolled-but-untracked state
        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.records.len(), 3);
        assert!(session.record("s9").unwrap().is_present);
    }

    #[tokio::test]
    async fn test_session_detail_reconciles_and_persists() {
        let (r, store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();
        r.mark_attendance("f1", &out.session_id, &Embedding::new(basis(4, 0)))
            .await
            .unwrap();

        // Enrollment edited after the fact: s1 removed, s9 added
        store.remove_student("s1").await;
        store.add_student(student("s9", 4, 2)).await;

        let detail = r.session_detail("f1", &out.session_id).await.unwrap();
        assert_eq!(detail.summary.total_students, 3);
        assert_eq!(detail.summary.present_students, 1);
        assert_eq!(detail.summary.absent_students, 2);
        assert_eq!(detail.summary.attendance_percentage, 33);

        assert_eq!(detail.present.len(), 1);
        assert_eq!(detail.present[0].student_id, "s0");
        assert_eq!(detail.present[0].marked_via, "face");

        // Enrolled-but-unmarked first, then the orphan record
        let absent_ids: Vec<&str> = detail.absent.iter().map(|e| e.student_id.as_str()).collect();
        assert_eq!(absent_ids, vec!["s9", "s1"]);

        // Self-healing is persisted, not display-only
        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.total_students, 3);
        assert_eq!(
            session.total_students,
            session.present_students + session.absent_students
        );
    }

    #[tokio::test]
    async fn test_session_detail_wrong_faculty() {
        let (r, _store, _sink) = setup(1).await;
        let out = r.start_session(start_request(), today()).await.unwrap();
        assert!(matches!(
            r.session_detail("f2", &out.session_id).await,
            Err(AttendanceError::Forbidden)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_distinct_students() {
        let n = 8;
        let (r, store, _sink) = setup(n).await;
        let out = r.start_session(start_request(), today()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..n {
            let r = r.clone();
            let session_id = out.session_id.clone();
            let probe = Embedding::new(basis(n + 2, i));
            handles.push(tokio::spawn(async move {
                r.mark_attendance("f1", &session_id, &probe).await
            }));
        }

        for handle in handles {
            let m = handle.await.unwrap().unwrap();
            assert!(!m.already_marked);
        }

        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.present_students, n as u32);
        assert_eq!(session.absent_students, 0);
        assert_eq!(session.total_students, n as u32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_same_student_collapse() {
        let (r, store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let r = r.clone();
            let session_id = out.session_id.clone();
            let probe = Embedding::new(basis(4, 0));
            handles.push(tokio::spawn(async move {
                r.mark_attendance("f1", &session_id, &probe).await
            }));
        }

        let mut first_marks = 0;
        for handle in handles {
            let m = handle.await.unwrap().unwrap();
            if !m.already_marked {
                first_marks += 1;
            }
        }
        assert_eq!(first_marks, 1);

        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.present_students, 1);
        assert_eq!(session.absent_students, 1);
    }

    #[tokio::test]
    async fn test_mark_missed_without_existing_session() {
        let (r, store, sink) = setup(2).await;

        let summary = r.mark_missed(missed_request("faculty on leave")).await.unwrap();
        assert!(summary.is_missed);
        assert_eq!(summary.missed_reason.as_deref(), Some("faculty on leave"));
        assert_eq!(summary.total_students, 2);
        assert_eq!(summary.present_students, 0);
        assert_eq!(summary.attendance_percentage, 0);

        let session = store.load(&summary.session_id).await.unwrap().unwrap();
        assert!(session.is_missed());
        assert!(matches!(
            sink.events().as_slice(),
            [AttendanceEvent::SessionMissed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_mark_missed_transitions_idle_session() {
        let (r, _store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();

        let summary = r.mark_missed(missed_request("power outage")).await.unwrap();
        assert_eq!(summary.session_id, out.session_id);
        assert!(summary.is_missed);

        // Terminal: no attendance on a missed session
        let err = r
            .mark_attendance("f1", &out.session_id, &Embedding::new(basis(4, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::SessionMissed));

        // Declaring it missed again is a repeatable success
        let again = r.mark_missed(missed_request("power outage")).await.unwrap();
        assert_eq!(again.session_id, out.session_id);
    }

    #[tokio::test]
    async fn test_mark_missed_rejected_after_attendance() {
        let (r, _store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();
        r.mark_attendance("f1", &out.session_id, &Embedding::new(basis(4, 0)))
            .await
            .unwrap();

        let err = r.mark_missed(missed_request("no show")).await.unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::CannotMarkMissed { present: 1 }
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_operation() {
        let store = Arc::new(MemoryStore::new());
        store.add_student(student("s0", 3, 0)).await;
        let guard = Arc::new(SessionCreationGuard::new(Duration::from_millis(1000)));
        let r = Reconciler::new(
            Arc::clone(&store),
            Arc::new(FailingSink),
            guard,
            FACE_MATCH_THRESHOLD,
        );

        let out = r.start_session(start_request(), today()).await.unwrap();
        let m = r
            .mark_attendance("f1", &out.session_id, &Embedding::new(basis(3, 0)))
            .await
            .unwrap();
        assert!(!m.already_marked);
    }

    #[tokio::test]
    async fn test_update_location_owner_only() {
        let (r, store, _sink) = setup(1).await;
        let out = r.start_session(start_request(), today()).await.unwrap();
        let location = Location {
            latitude: 17.385,
            longitude: 78.4867,
            address: Some("Block C".into()),
            accuracy: Some(12.0),
        };

        assert!(matches!(
            r.update_location("f2", &out.session_id, location.clone()).await,
            Err(AttendanceError::Forbidden)
        ));

        r.update_location("f1", &out.session_id, location.clone())
            .await
            .unwrap();
        let session = store.load(&out.session_id).await.unwrap().unwrap();
        assert_eq!(session.location, Some(location));
    }

    #[tokio::test]
    async fn test_mark_attendance_from_image() {
        let (r, _store, _sink) = setup(2).await;
        let out = r.start_session(start_request(), today()).await.unwrap();

        let embedder = FixedEmbedder(Embedding::new(basis(4, 1)));
        let m = r
            .mark_attendance_from_image(&embedder, "f1", &out.session_id, b"jpeg")
            .await
            .unwrap();
        assert_eq!(m.student_id, "s1");

        let err = r
            .mark_attendance_from_image(&DownEmbedder, "f1", &out.session_id, b"jpeg")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::Embedding(EmbedError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_missed_validation() {
        let (r, _store, _sink) = setup(1).await;

        let mut req = missed_request("fog");
        req.faculty_id.clear();
        assert!(matches!(
            r.mark_missed(req).await,
            Err(AttendanceError::Validation(_))
        ));

        let mut req = missed_request("fog");
        req.hours.clear();
        assert!(matches!(
            r.mark_missed(req).await,
            Err(AttendanceError::Validation(_))
        ));
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn key_on(subject: &str, day: u32) -> SessionKey {
        SessionKey {
            faculty_id: "f1".into(),
            subject: subject.into(),
            section: "A".into(),
            session_type: SessionType::Lecture,
            date: date(day),
        }
    }

    #[tokio::test]
    async fn test_student_attendance_rollup() {
        let (r, store, _sink) = setup(2).await;
        let roster = store.load_roster("CS101", "A", "f1").await.unwrap();
        let now = Utc::now();

        let mut day1 = AttendanceSession::new(key_on("CS101", 1), vec![1, 2], None, &roster, now);
        day1.mark_present("s0", 0.9, now).unwrap();
        store.insert(day1).await.unwrap();

        let mut day2 = AttendanceSession::new(key_on("CS101", 2), vec![3, 4], None, &roster, now);
        day2.mark_present("s0", 0.95, now).unwrap();
        day2.mark_present("s1", 0.8, now).unwrap();
        store.insert(day2).await.unwrap();

        // A cancelled class must not count against anyone
        let missed = AttendanceSession::new_missed(
            key_on("CS101", 3),
            vec![1],
            &roster,
            "holiday".into(),
            None,
            now,
        );
        store.insert(missed).await.unwrap();

        let report = r
            .student_attendance("f1", "CS101", "A", SessionType::Lecture)
            .await
            .unwrap();
        assert_eq!(report.total_sessions, 2);
        let range = report.date_range.unwrap();
        assert_eq!((range.from, range.to), (date(1), date(2)));

        let s0 = report.students.iter().find(|s| s.student_id == "s0").unwrap();
        assert_eq!(s0.present_sessions, 2);
        assert_eq!(s0.absent_sessions, 0);
        assert_eq!(s0.attendance_percentage, 100);
        assert_eq!(s0.last_present_date, Some(date(2)));
        assert_eq!(s0.last_present_hours.as_deref(), Some(&[3, 4][..]));

        let s1 = report.students.iter().find(|s| s.student_id == "s1").unwrap();
        assert_eq!(s1.present_sessions, 1);
        assert_eq!(s1.absent_sessions, 1);
        assert_eq!(s1.attendance_percentage, 50);
        assert_eq!(s1.last_present_date, Some(date(2)));
    }

    #[tokio::test]
    async fn test_student_attendance_validation() {
        let (r, _store, _sink) = setup(1).await;
        assert!(matches!(
            r.student_attendance("f1", "", "A", SessionType::Lecture).await,
            Err(AttendanceError::Validation(_))
        ));
        assert!(matches!(
            r.student_attendance("", "CS101", "A", SessionType::Lecture).await,
            Err(AttendanceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_session_reports_filters_and_lists() {
        let (r, store, _sink) = setup(2).await;
        let roster = store.load_roster("CS101", "A", "f1").await.unwrap();
        let now = Utc::now();

        let day1 = AttendanceSession::new(key_on("CS101", 1), vec![1], None, &roster, now);
        store.insert(day1).await.unwrap();

        let mut day2 = AttendanceSession::new(key_on("CS101", 2), vec![2], None, &roster, now);
        day2.mark_present("s0", 0.9, now).unwrap();
        store.insert(day2).await.unwrap();

        let other_subject = AttendanceSession::new(key_on("MA102", 2), vec![1], None, &roster, now);
        store.insert(other_subject).await.unwrap();

        let missed = AttendanceSession::new_missed(
            key_on("CS101", 3),
            vec![1],
            &roster,
            "holiday".into(),
            None,
            now,
        );
        store.insert(missed).await.unwrap();

        let narrowed = r
            .session_reports(
                "f1",
                ReportQuery {
                    subject: Some("CS101".into()),
                    from: Some(date(2)),
                    to: Some(date(2)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(narrowed.len(), 1);
        let entry = &narrowed[0];
        assert_eq!(entry.summary.date, date(2));
        assert_eq!(entry.present.len(), 1);
        assert_eq!(entry.present[0].student_id, "s0");
        assert_eq!(entry.present[0].marked_via, "face");
        let absent_ids: Vec<&str> = entry.absent.iter().map(|e| e.student_id.as_str()).collect();
        assert_eq!(absent_ids, vec!["s1"]);

        // Unfiltered history: newest first, missed sessions included
        let all = r.session_reports("f1", ReportQuery::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].summary.date, date(3));
        assert!(all[0].summary.is_missed);
        assert_eq!(all.last().unwrap().summary.date, date(1));
    }

    struct FirstEnrolledMatcher;

    impl Matcher for FirstEnrolledMatcher {
        fn find_best(
            &self,
            _probe: &Embedding,
            roster: &[Student],
            _threshold: f32,
        ) -> Option<MatchResult> {
            roster.first().map(|s| MatchResult {
                student_id: s.id.clone(),
                similarity: 1.0,
            })
        }
    }

    #[tokio::test]
    async fn test_matcher_strategy_is_swappable() {
        let store = Arc::new(MemoryStore::new());
        store.add_student(student("s0", 3, 0)).await;
        let sink = Arc::new(RecordingSink::new());
        let guard = Arc::new(SessionCreationGuard::new(Duration::from_millis(1000)));
        let r = Reconciler::with_matcher(
            Arc::clone(&store),
            sink,
            guard,
            FirstEnrolledMatcher,
            FACE_MATCH_THRESHOLD,
        );

        let out = r.start_session(start_request(), today()).await.unwrap();

        // A zero probe matches nothing under cosine; the injected
        // strategy decides instead.
        let m = r
            .mark_attendance("f1", &out.session_id, &Embedding::new(vec![0.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(m.student_id, "s0");
        assert!(!m.already_marked);
    }
}
