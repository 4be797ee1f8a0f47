//! The attendance-capture decision pipeline.
//!
//! SessionCheck → EmbeddingCheck → MatchCheck → RecordCheck. Every
//! request runs to one of the four terminal outcomes; infrastructure
//! failures (store gone, engine thread gone) are a separate error type so
//! callers never confuse "system broken" with "face not recognized".

use chrono::{Datelike, NaiveDateTime};
use rollcall_core::{
    resolve_active, CaptureOutcome, CosineMatcher, EmbedOutcome, Matcher, Session, StudentIdentity,
};
use rollcall_store::{RecordOutcome, Store, StoreError};
use thiserror::Error;

use crate::engine::{EngineError, EngineHandle};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Outcome of a face-registration request.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// Embedding computed and stored against the student.
    Registered,
    /// No usable face in the submitted image; nothing was stored.
    NoFace,
}

/// One roster member with today's presence flag, for roster-status views.
#[derive(Debug)]
pub struct RosterEntry {
    pub student: StudentIdentity,
    pub marked: bool,
}

#[derive(Clone)]
pub struct Pipeline {
    store: Store,
    engine: EngineHandle,
    threshold: f32,
}

impl Pipeline {
    pub fn new(store: Store, engine: EngineHandle, threshold: f32) -> Self {
        Self {
            store,
            engine,
            threshold,
        }
    }

    /// Run one capture request to a terminal outcome.
    pub async fn capture(
        &self,
        image: Vec<u8>,
        at: NaiveDateTime,
        lecturer_scope: Option<&str>,
    ) -> Result<CaptureOutcome, PipelineError> {
        // SessionCheck
        let candidates = self.store.sessions_on(at.weekday()).await?;
        let Some(session) = resolve_active(&candidates, at, lecturer_scope) else {
            tracing::debug!(%at, "no active session");
            return Ok(CaptureOutcome::NoActiveSession);
        };
        let session = session.clone();

        // EmbeddingCheck
        let probe = match self.engine.embed(image).await? {
            EmbedOutcome::Face(embedding) => embedding,
            EmbedOutcome::NoFace => {
                tracing::debug!(session = session.id, "no face in frame");
                return Ok(CaptureOutcome::Unidentifiable);
            }
        };

        // MatchCheck
        let roster = self.store.roster_for(&session).await?;
        let result = CosineMatcher.identify(&probe, &roster, self.threshold);
        let Some(student) = result.student else {
            tracing::debug!(
                session = session.id,
                best_similarity = result.similarity,
                threshold = self.threshold,
                "no roster member above threshold"
            );
            return Ok(CaptureOutcome::Unidentifiable);
        };

        // RecordCheck
        let recorded = self
            .store
            .record_attendance(session.id, student.student_number.clone(), at)
            .await?;
        match recorded {
            RecordOutcome::Recorded(_) => {
                tracing::info!(
                    student = %student.student_number,
                    session = session.id,
                    similarity = result.similarity,
                    "marked present"
                );
                Ok(CaptureOutcome::Present(student))
            }
            RecordOutcome::Duplicate => {
                tracing::debug!(
                    student = %student.student_number,
                    session = session.id,
                    "already marked today"
                );
                Ok(CaptureOutcome::AlreadyPresent(student))
            }
        }
    }

    /// Compute and store a student's face embedding from a reference image.
    /// A no-face image stores nothing and reports [`RegisterOutcome::NoFace`].
    pub async fn register_face(
        &self,
        student_number: &str,
        image: Vec<u8>,
    ) -> Result<RegisterOutcome, PipelineError> {
        let embedding = match self.engine.embed(image).await? {
            EmbedOutcome::Face(embedding) => embedding,
            EmbedOutcome::NoFace => return Ok(RegisterOutcome::NoFace),
        };

        self.store
            .set_embedding(student_number.to_string(), &embedding, None)
            .await?;
        tracing::info!(student = student_number, "face registered");
        Ok(RegisterOutcome::Registered)
    }

    /// The active session at `at` (if any) with its roster and per-student
    /// marked flags for that calendar date. Drives the watch loop's exit
    /// condition.
    pub async fn roster_status(
        &self,
        at: NaiveDateTime,
        lecturer_scope: Option<&str>,
    ) -> Result<Option<(Session, Vec<RosterEntry>)>, PipelineError> {
        let candidates = self.store.sessions_on(at.weekday()).await?;
        let Some(session) = resolve_active(&candidates, at, lecturer_scope) else {
            return Ok(None);
        };
        let session = session.clone();

        let roster = self.store.roster_for(&session).await?;
        let today = self.store.attendance_on(at.date()).await?;
        let entries = roster
            .into_iter()
            .map(|student| {
                let marked = today
                    .iter()
                    .any(|r| r.session_id == session.id && r.student_number == student.student_number);
                RosterEntry { student, marked }
            })
            .collect();

        Ok(Some((session, entries)))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
