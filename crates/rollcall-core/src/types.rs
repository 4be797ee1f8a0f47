use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Face embedding vector (512-dimensional, L2-normalized by the embedder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// An enrolled student. The stored embedding is set once during face
/// registration; a student without one can never be matched, but still
/// belongs to rosters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub student_number: String,
    pub name: String,
    pub embedding: Option<Embedding>,
    pub image_path: Option<String>,
}

/// A weekly class period: half-open time window `[start, end)` on a fixed
/// weekday, tied to a venue and a course offering whose registrations form
/// the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub course_code: String,
    pub lecturer_number: String,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub venue: String,
}

/// Recorded presence status. The capture pipeline only ever writes
/// `Present`; `Absent` exists for administratively seeded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Present" => Some(AttendanceStatus::Present),
            "Absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One presence event. At most one row may exist per
/// (student_number, session_id, date); the store's uniqueness constraint
/// enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_number: String,
    pub session_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
}

/// Terminal outcome of one capture request.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Student matched and a new presence record was written.
    Present(StudentIdentity),
    /// Student matched but was already recorded for this session today.
    AlreadyPresent(StudentIdentity),
    /// No face in the frame, or no roster member above the threshold.
    Unidentifiable,
    /// No session window contains the capture time.
    NoActiveSession,
}

impl CaptureOutcome {
    /// Wire-level status tag for the capture endpoint.
    pub fn status_str(&self) -> &'static str {
        match self {
            CaptureOutcome::Present(_) => "present",
            CaptureOutcome::AlreadyPresent(_) => "already_present",
            CaptureOutcome::Unidentifiable => "unidentifiable",
            CaptureOutcome::NoActiveSession => "no_active_session",
        }
    }

    /// The matched student, if this outcome carries one.
    pub fn student(&self) -> Option<&StudentIdentity> {
        match self {
            CaptureOutcome::Present(s) | CaptureOutcome::AlreadyPresent(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(AttendanceStatus::parse("Present"), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse("Absent"), Some(AttendanceStatus::Absent));
        assert_eq!(AttendanceStatus::parse("late"), None);
        assert_eq!(AttendanceStatus::Present.as_str(), "Present");
    }

    #[test]
    fn test_outcome_status_tags() {
        assert_eq!(CaptureOutcome::Unidentifiable.status_str(), "unidentifiable");
        assert_eq!(CaptureOutcome::NoActiveSession.status_str(), "no_active_session");
        assert!(CaptureOutcome::Unidentifiable.student().is_none());
    }
}
