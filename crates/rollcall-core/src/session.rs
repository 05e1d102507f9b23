//! Attendance session document: the state machine, count invariants, and
//! the reconciliation math that self-heals cached counts against the
//! current roster.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{clamp_confidence, Student};

/// Kind of class meeting a session covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Lecture,
    Tutorial,
    Practical,
    Skill,
}

/// Where the session was taken, as reported by the faculty device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Natural key of a session. At most one non-missed session may exist per
/// key; the `date` component is already time-truncated by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub faculty_id: String,
    pub subject: String,
    pub section: String,
    pub session_type: SessionType,
    pub date: NaiveDate,
}

/// Per-student entry embedded in the session document.
///
/// Name and roll number are snapshotted at creation so historical sessions
/// survive a student rename. `is_present` is monotonic: this engine never
/// resets it to false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub is_present: bool,
    pub marked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl AttendanceRecord {
    fn absent(student: &Student, now: DateTime<Utc>) -> Self {
        Self {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            roll_number: student.roll_number.clone(),
            is_present: false,
            marked_at: now,
            confidence: None,
        }
    }
}

/// Session lifecycle. `Missed` is terminal and only reachable while no
/// student has been marked present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Missed {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        at: DateTime<Utc>,
    },
}

/// Rejected record or state transitions.
#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("student {0} has no record in this session")]
    NoRecord(String),
    #[error("session is marked missed and no longer accepts attendance")]
    AlreadyMissed,
    #[error("{present} student(s) already marked present; session cannot be marked missed")]
    PresentStudentsExist { present: u32 },
}

/// Outcome of a present-marking attempt that did not error.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// First transition to present for this student.
    Marked { confidence: f32 },
    /// Duplicate detection; counts unchanged.
    AlreadyPresent,
}

/// Present-list entry for detail and report views.
#[derive(Debug, Clone, Serialize)]
pub struct PresentEntry {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    pub marked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub marked_via: &'static str,
}

/// Absent-list entry: an enrolled-but-unmarked student, or an orphan
/// record whose student has since left the roster.
#[derive(Debug, Clone, Serialize)]
pub struct AbsentEntry {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
}

/// One attendance-taking instance for a class meeting.
///
/// Cached counts always satisfy `total == present + absent`; they are
/// recomputed from `records` plus the live roster by [`reconcile`], never
/// trusted as the sole source of truth.
///
/// [`reconcile`]: AttendanceSession::reconcile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: String,
    pub faculty_id: String,
    pub subject: String,
    pub section: String,
    pub session_type: SessionType,
    pub hours: Vec<u32>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub records: Vec<AttendanceRecord>,
    pub total_students: u32,
    pub present_students: u32,
    pub absent_students: u32,
    #[serde(flatten)]
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token; bumped by the store on every save.
    #[serde(default)]
    pub revision: u64,
}

impl AttendanceSession {
    /// Create an active session with one absent record per roster student.
    pub fn new(
        key: SessionKey,
        hours: Vec<u32>,
        location: Option<Location>,
        roster: &[Student],
        now: DateTime<Utc>,
    ) -> Self {
        let records: Vec<AttendanceRecord> =
            roster.iter().map(|s| AttendanceRecord::absent(s, now)).collect();
        let total = records.len() as u32;

        Self {
            id: Uuid::new_v4().to_string(),
            faculty_id: key.faculty_id,
            subject: key.subject,
            section: key.section,
            session_type: key.session_type,
            hours,
            date: key.date,
            location,
            records,
            total_students: total,
            present_students: 0,
            absent_students: total,
            state: SessionState::Active,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Create a session directly in the `Missed` state, roster snapshotted
    /// as all-absent. Reports then show "0% attendance, marked missed"
    /// rather than a gap.
    pub fn new_missed(
        key: SessionKey,
        hours: Vec<u32>,
        roster: &[Student],
        reason: String,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::new(key, hours, None, roster, now);
        session.state = SessionState::Missed { reason, note, at: now };
        session
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            faculty_id: self.faculty_id.clone(),
            subject: self.subject.clone(),
            section: self.section.clone(),
            session_type: self.session_type,
            date: self.date,
        }
    }

    pub fn is_missed(&self) -> bool {
        matches!(self.state, SessionState::Missed { .. })
    }

    pub fn record(&self, student_id: &str) -> Option<&AttendanceRecord> {
        self.records.iter().find(|r| r.student_id == student_id)
    }

    /// Mark a student present with the raw similarity of the accepted
    /// match. Idempotent: an already-present student is a no-op reported
    /// as [`MarkOutcome::AlreadyPresent`].
    pub fn mark_present(
        &mut self,
        student_id: &str,
        raw_similarity: f32,
        now: DateTime<Utc>,
    ) -> Result<MarkOutcome, SessionError> {
        if self.is_missed() {
            return Err(SessionError::AlreadyMissed);
        }

        let record = self
            .records
            .iter_mut()
            .find(|r| r.student_id == student_id)
            .ok_or_else(|| SessionError::NoRecord(student_id.to_string()))?;

        if record.is_present {
            return Ok(MarkOutcome::AlreadyPresent);
        }

        let confidence = clamp_confidence(raw_similarity);
        record.is_present = true;
        record.marked_at = now;
        record.confidence = Some(confidence);

        self.present_students += 1;
        self.absent_students = self.absent_students.saturating_sub(1);
        self.updated_at = now;

        Ok(MarkOutcome::Marked { confidence })
    }

    /// Append an absent record for a student who enrolled after the
    /// session was created. No-op if a record already exists.
    pub fn admit_late_enrollee(&mut self, student: &Student, now: DateTime<Utc>) {
        if self.record(&student.id).is_some() {
            return;
        }
        self.records.push(AttendanceRecord::absent(student, now));
        self.total_students += 1;
        self.absent_students += 1;
        self.updated_at = now;
    }

    /// Transition `Active -> Missed`. Rejected once any student is
    /// present, and on a session that is already missed.
    pub fn mark_missed(
        &mut self,
        reason: String,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.is_missed() {
            return Err(SessionError::AlreadyMissed);
        }
        if self.present_students > 0 {
            return Err(SessionError::PresentStudentsExist {
                present: self.present_students,
            });
        }
        self.state = SessionState::Missed { reason, note, at: now };
        self.updated_at = now;
        Ok(())
    }

    fn present_ids(&self) -> HashSet<&str> {
        self.records
            .iter()
            .filter(|r| r.is_present)
            .map(|r| r.student_id.as_str())
            .collect()
    }

    /// Recompute the cached counts from `records` and the current roster.
    /// Returns true if anything changed (caller should persist).
    ///
    /// Total is the larger of the current enrollment and the union of
    /// enrolled ids with record ids, so removing a marked-present student
    /// from the roster can never push `total` below `present`.
    pub fn reconcile(&mut self, roster: &[Student], now: DateTime<Utc>) -> bool {
        let present = self.present_ids();

        let mut union: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();
        union.extend(self.records.iter().map(|r| r.student_id.as_str()));

        let actual_total = roster.len().max(union.len()) as u32;
        let actual_present = present.len() as u32;
        let actual_absent = actual_total - actual_present;

        let changed = self.total_students != actual_total
            || self.present_students != actual_present
            || self.absent_students != actual_absent;

        if changed {
            tracing::debug!(
                session = %self.id,
                total = actual_total,
                present = actual_present,
                absent = actual_absent,
                "reconciled cached counts"
            );
            self.total_students = actual_total;
            self.present_students = actual_present;
            self.absent_students = actual_absent;
            self.updated_at = now;
        }
        changed
    }

    pub fn present_entries(&self) -> Vec<PresentEntry> {
        self.records
            .iter()
            .filter(|r| r.is_present)
            .map(|r| PresentEntry {
                student_id: r.student_id.clone(),
                name: r.student_name.clone(),
                roll_number: r.roll_number.clone(),
                marked_at: r.marked_at,
                confidence: r.confidence,
                marked_via: "face",
            })
            .collect()
    }

    /// Two-pass absent list: every enrolled student not marked present
    /// (preferring a record's snapshotted name/roll over the roster's
    /// current one), then every orphan record: a student in neither the
    /// present set nor the current roster.
    pub fn absent_entries(&self, roster: &[Student]) -> Vec<AbsentEntry> {
        let present = self.present_ids();
        let roster_ids: HashSet<&str> = roster.iter().map(|s| s.id.as_str()).collect();

        let mut absent = Vec::new();

        for student in roster {
            if present.contains(student.id.as_str()) {
                continue;
            }
            let entry = match self.record(&student.id) {
                Some(r) => AbsentEntry {
                    student_id: r.student_id.clone(),
                    name: r.student_name.clone(),
                    roll_number: r.roll_number.clone(),
                },
                None => AbsentEntry {
                    student_id: student.id.clone(),
                    name: student.name.clone(),
                    roll_number: student.roll_number.clone(),
                },
            };
            absent.push(entry);
        }

        for r in &self.records {
            if !present.contains(r.student_id.as_str())
                && !roster_ids.contains(r.student_id.as_str())
            {
                absent.push(AbsentEntry {
                    student_id: r.student_id.clone(),
                    name: r.student_name.clone(),
                    roll_number: r.roll_number.clone(),
                });
            }
        }

        absent
    }

    /// Rounded percentage for displays; 0 when the session has no students.
    pub fn attendance_percentage(&self) -> u32 {
        if self.total_students == 0 {
            0
        } else {
            ((self.present_students as f64 / self.total_students as f64) * 100.0).round() as u32
        }
    }
}
