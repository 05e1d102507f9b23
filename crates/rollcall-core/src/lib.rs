//! rollcall-core — face-match resolution and attendance reconciliation.
//!
//! Matches a probe face embedding against an enrolled roster (cosine
//! similarity under a fixed acceptance threshold) and keeps attendance
//! session documents consistent — present/absent/total counts, duplicate
//! detections, late enrollment — as the roster drifts underneath them.

pub mod session;
pub mod types;

pub use session::{
    AbsentEntry, AttendanceRecord, AttendanceSession, Location, MarkOutcome, PresentEntry,
    SessionError, SessionKey, SessionState, SessionType,
};
pub use types::{
    clamp_confidence, CosineMatcher, Embedding, Enrollment, MatchResult, Matcher, Student,
    FACE_MATCH_THRESHOLD,
};
