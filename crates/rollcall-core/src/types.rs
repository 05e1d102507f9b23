use serde::{Deserialize, Serialize};

/// Minimum cosine similarity for a positive identification.
///
/// FaceNet embeddings separate well at 0.6; lowering this admits
/// look-alike false positives faster than it recovers missed matches.
pub const FACE_MATCH_THRESHOLD: f32 = 0.6;

/// Face embedding vector (512-dimensional FaceNet output in production).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "facenet-512").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Mismatched lengths or a zero-magnitude operand score 0 rather than
    /// erroring: one malformed stored vector must never abort a roster scan.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.is_empty()
            || other.values.is_empty()
            || self.values.len() != other.values.len()
        {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Clamp a raw similarity into [0, 1] before storage.
///
/// Raw cosine can drift past 1.0 or go negative on malformed vectors;
/// stored confidence feeds percentage displays and must stay in range.
/// Non-finite input clamps to 0.
pub fn clamp_confidence(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// One (subject, section, faculty) membership for a student.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Enrollment {
    pub subject: String,
    pub section: String,
    pub faculty_id: String,
}

/// Roster entry: a student and their enrolled face samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    /// One embedding per captured face sample. May be empty.
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
    /// Single descriptor kept for students enrolled before multi-sample
    /// capture shipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_descriptor: Option<Embedding>,
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
}

impl Student {
    /// Reference vectors to match against: the `embeddings` list, falling
    /// back to the legacy single descriptor. Empty means "cannot match".
    pub fn reference_vectors(&self) -> &[Embedding] {
        if !self.embeddings.is_empty() {
            &self.embeddings
        } else if let Some(legacy) = &self.face_descriptor {
            std::slice::from_ref(legacy)
        } else {
            &[]
        }
    }

    pub fn has_face_data(&self) -> bool {
        !self.reference_vectors().is_empty()
    }

    pub fn is_enrolled_in(&self, subject: &str, section: &str, faculty_id: &str) -> bool {
        self.enrollments.iter().any(|e| {
            e.subject == subject && e.section == section && e.faculty_id == faculty_id
        })
    }
}

/// Result of matching a probe embedding against a roster.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub student_id: String,
    /// Raw cosine similarity of the accepted match (not yet clamped).
    pub similarity: f32,
}

/// Strategy for resolving a probe embedding to one enrolled student.
///
/// List-in, best-match-out so an ANN index can replace the linear scan
/// without touching callers.
pub trait Matcher {
    fn find_best(&self, probe: &Embedding, roster: &[Student], threshold: f32)
        -> Option<MatchResult>;
}

/// Linear-scan cosine matcher over every reference vector of every
/// candidate.
///
/// A candidate takes the lead only on a strictly higher score that also
/// clears the threshold, so equal top scores resolve to the first
/// candidate enumerated. That tie-break inherits roster fetch order;
/// kept as documented behavior, not strengthened here.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn find_best(
        &self,
        probe: &Embedding,
        roster: &[Student],
        threshold: f32,
    ) -> Option<MatchResult> {
        let mut best: Option<MatchResult> = None;
        let mut best_sim = 0.0f32;

        for student in roster {
            let references = student.reference_vectors();
            if references.is_empty() {
                tracing::debug!(student = %student.id, "no face data enrolled, skipping");
                continue;
            }

            for reference in references {
                let sim = probe.similarity(reference);
                if sim > best_sim && sim >= threshold {
                    best_sim = sim;
                    best = Some(MatchResult {
                        student_id: student.id.clone(),
                        similarity: sim,
                    });
                }
            }
        }

        if let Some(m) = &best {
            tracing::debug!(student = %m.student_id, similarity = m.similarity, "best match");
        }
        best
    }
}
