//! rollcall-core — Attendance-capture decision engine.
//!
//! Schedule-window resolution, cosine-similarity identity matching against
//! a session roster, and the ONNX embedding-provider adapter.

pub mod embedder;
pub mod matcher;
pub mod schedule;
pub mod types;

pub use embedder::{EmbedOutcome, FaceEmbedder, OrtEmbedder};
pub use matcher::{CosineMatcher, MatchResult, Matcher};
pub use schedule::resolve_active;
pub use types::{AttendanceRecord, AttendanceStatus, CaptureOutcome, Embedding, Session, StudentIdentity};
