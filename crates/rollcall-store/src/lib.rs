//! rollcall-store — SQLite-backed record store.
//!
//! Read-only views over students, sessions, and registrations, plus the
//! attendance recorder. The attendance table carries a uniqueness
//! constraint on (student_number, session_id, date); that constraint, not
//! application locking, is what makes concurrent captures of the same
//! student idempotent.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rollcall_core::{AttendanceRecord, AttendanceStatus, Embedding, Session, StudentIdentity};
use thiserror::Error;
use tokio_rusqlite::Connection;
use uuid::Uuid;

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("unknown student: {0}")]
    StudentNotFound(String),
    #[error("unknown session: {0}")]
    SessionNotFound(i64),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Outcome of the recorder's atomic check-and-insert.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// A new presence row was written.
    Recorded(AttendanceRecord),
    /// A row for this (student, session, date) already existed.
    Duplicate,
}

/// Handle to the attendance database. Cheap to clone; all calls run on
/// tokio-rusqlite's dedicated connection thread.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and bootstrap the schema.
    pub async fn open(path: std::path::PathBuf) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS students (
                         student_number TEXT PRIMARY KEY,
                         name           TEXT NOT NULL,
                         embedding      BLOB,
                         image_path     TEXT
                     );
                     CREATE TABLE IF NOT EXISTS sessions (
                         id              INTEGER PRIMARY KEY AUTOINCREMENT,
                         course_code     TEXT NOT NULL,
                         lecturer_number TEXT NOT NULL,
                         weekday         INTEGER NOT NULL,
                         start_time      TEXT NOT NULL,
                         end_time        TEXT NOT NULL,
                         venue           TEXT NOT NULL,
                         CHECK (start_time < end_time)
                     );
                     CREATE TABLE IF NOT EXISTS registrations (
                         id             INTEGER PRIMARY KEY AUTOINCREMENT,
                         student_number TEXT NOT NULL,
                         course_code    TEXT NOT NULL
                     );
                     CREATE TABLE IF NOT EXISTS attendance (
                         id             TEXT PRIMARY KEY,
                         student_number TEXT NOT NULL,
                         session_id     INTEGER NOT NULL,
                         date           TEXT NOT NULL,
                         time           TEXT NOT NULL,
                         status         TEXT NOT NULL,
                         UNIQUE (student_number, session_id, date)
                     );",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // --- students ---

    pub async fn add_student(
        &self,
        student_number: String,
        name: String,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO students (student_number, name) VALUES (?1, ?2)
                     ON CONFLICT(student_number) DO UPDATE SET name = excluded.name",
                    rusqlite::params![student_number, name],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_student(
        &self,
        student_number: String,
    ) -> Result<Option<StudentIdentity>, StoreError> {
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT student_number, name, embedding, image_path
                     FROM students WHERE student_number = ?1",
                )?;
                let mut rows = stmt.query_map(rusqlite::params![student_number], student_from_row)?;
                Ok(rows.next().transpose()?)
            })
            .await?;
        row.map(validate_student).transpose()
    }

    pub async fn list_students(&self) -> Result<Vec<StudentIdentity>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT student_number, name, embedding, image_path
                     FROM students ORDER BY student_number",
                )?;
                let rows = stmt
                    .query_map([], student_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(validate_student).collect()
    }

    /// Store the computed embedding for a student. The registration flow
    /// guarantees this is only called with a real face embedding.
    pub async fn set_embedding(
        &self,
        student_number: String,
        embedding: &Embedding,
        image_path: Option<String>,
    ) -> Result<(), StoreError> {
        let blob = embedding_to_blob(embedding);
        let number_for_err = student_number.clone();
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE students SET embedding = ?2, image_path = COALESCE(?3, image_path)
                     WHERE student_number = ?1",
                    rusqlite::params![student_number, blob, image_path],
                )?;
                Ok(n)
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::StudentNotFound(number_for_err));
        }
        Ok(())
    }

    // --- sessions ---

    pub async fn add_session(
        &self,
        course_code: String,
        lecturer_number: String,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
        venue: String,
    ) -> Result<i64, StoreError> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (course_code, lecturer_number, weekday, start_time, end_time, venue)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        course_code,
                        lecturer_number,
                        weekday_to_i64(weekday),
                        start.format(TIME_FMT).to_string(),
                        end.format(TIME_FMT).to_string(),
                        venue
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_session(&self, id: i64) -> Result<Session, StoreError> {
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, course_code, lecturer_number, weekday, start_time, end_time, venue
                     FROM sessions WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map(rusqlite::params![id], session_row)?;
                Ok(rows.next().transpose()?)
            })
            .await?;
        match row {
            Some(raw) => session_from_raw(raw),
            None => Err(StoreError::SessionNotFound(id)),
        }
    }

    /// All sessions on the given weekday, ordered by id. Candidate rows
    /// for the schedule resolver; window containment is decided in core.
    pub async fn sessions_on(&self, weekday: Weekday) -> Result<Vec<Session>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, course_code, lecturer_number, weekday, start_time, end_time, venue
                     FROM sessions WHERE weekday = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![weekday_to_i64(weekday)], session_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(session_from_raw).collect()
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, course_code, lecturer_number, weekday, start_time, end_time, venue
                     FROM sessions ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], session_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(session_from_raw).collect()
    }

    // --- registrations / roster ---

    pub async fn add_registration(
        &self,
        student_number: String,
        course_code: String,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO registrations (student_number, course_code) VALUES (?1, ?2)",
                    rusqlite::params![student_number, course_code],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The roster for a session's course offering. Membership is a set:
    /// a student registered through multiple rows appears once. Students
    /// without a stored embedding are included; the matcher skips them.
    pub async fn roster_for(&self, session: &Session) -> Result<Vec<StudentIdentity>, StoreError> {
        let course_code = session.course_code.clone();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT s.student_number, s.name, s.embedding, s.image_path
                     FROM students s
                     JOIN registrations r ON r.student_number = s.student_number
                     WHERE r.course_code = ?1
                     ORDER BY s.student_number",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![course_code], student_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(validate_student).collect()
    }

    // --- attendance ---

    /// Atomic check-and-insert for one presence event.
    ///
    /// The SELECT is an optimization; the UNIQUE constraint on
    /// (student_number, session_id, date) is the authoritative guard. A
    /// constraint violation from a racing insert is absorbed as
    /// [`RecordOutcome::Duplicate`], never surfaced as a failure.
    pub async fn record_attendance(
        &self,
        session_id: i64,
        student_number: String,
        at: NaiveDateTime,
    ) -> Result<RecordOutcome, StoreError> {
        let date = at.date();
        let time = at.time();
        let record = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            student_number,
            session_id,
            date,
            time,
            status: AttendanceStatus::Present,
        };

        let outcome = self
            .conn
            .call(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT id FROM attendance
                         WHERE student_number = ?1 AND session_id = ?2 AND date = ?3",
                        rusqlite::params![
                            record.student_number,
                            record.session_id,
                            record.date.format(DATE_FMT).to_string()
                        ],
                        |row| row.get(0),
                    )
                    .ok();
                if existing.is_some() {
                    return Ok(RecordOutcome::Duplicate);
                }

                let inserted = conn.execute(
                    "INSERT INTO attendance (id, student_number, session_id, date, time, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        record.id,
                        record.student_number,
                        record.session_id,
                        record.date.format(DATE_FMT).to_string(),
                        record.time.format(TIME_FMT).to_string(),
                        record.status.as_str()
                    ],
                );

                match inserted {
                    Ok(_) => Ok(RecordOutcome::Recorded(record)),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        // Lost the race to a concurrent capture.
                        Ok(RecordOutcome::Duplicate)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(outcome)
    }

    pub async fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_number, session_id, date, time, status
                     FROM attendance WHERE date = ?1 ORDER BY time",
                )?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![date.format(DATE_FMT).to_string()],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, student_number, session_id, date, time, status)| {
                Ok(AttendanceRecord {
                    id,
                    student_number,
                    session_id,
                    date: NaiveDate::parse_from_str(&date, DATE_FMT)
                        .map_err(|e| StoreError::Corrupt(format!("attendance date: {e}")))?,
                    time: NaiveTime::parse_from_str(&time, TIME_FMT)
                        .map_err(|e| StoreError::Corrupt(format!("attendance time: {e}")))?,
                    status: AttendanceStatus::parse(&status)
                        .ok_or_else(|| StoreError::Corrupt(format!("attendance status: {status}")))?,
                })
            })
            .collect()
    }
}

// --- row mapping helpers ---

type RawStudent = (String, String, Option<Vec<u8>>, Option<String>);
type RawSession = (i64, String, String, i64, String, String, String);

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStudent> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
    ))
}

fn validate_student(raw: RawStudent) -> Result<StudentIdentity, StoreError> {
    let (student_number, name, blob, image_path) = raw;
    let embedding = blob
        .map(|b| embedding_from_blob(&b))
        .transpose()?;
    Ok(StudentIdentity {
        student_number,
        name,
        embedding,
        image_path,
    })
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn session_from_raw(raw: RawSession) -> Result<Session, StoreError> {
    let (id, course_code, lecturer_number, weekday, start, end, venue) = raw;
    Ok(Session {
        id,
        course_code,
        lecturer_number,
        weekday: weekday_from_i64(weekday)
            .ok_or_else(|| StoreError::Corrupt(format!("session {id} weekday: {weekday}")))?,
        start: NaiveTime::parse_from_str(&start, TIME_FMT)
            .map_err(|e| StoreError::Corrupt(format!("session {id} start: {e}")))?,
        end: NaiveTime::parse_from_str(&end, TIME_FMT)
            .map_err(|e| StoreError::Corrupt(format!("session {id} end: {e}")))?,
        venue,
    })
}

/// Embeddings persist as little-endian f32 blobs.
fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.values.len() * 4);
    for v in &embedding.values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn embedding_from_blob(blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob length {} not a multiple of 4",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding {
        values,
        model_version: None,
    })
}

fn weekday_to_i64(weekday: Weekday) -> i64 {
    weekday.num_days_from_monday() as i64
}

fn weekday_from_i64(n: i64) -> Option<Weekday> {
    match n {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    async fn seeded_store() -> (Store, i64) {
        let store = Store::open_in_memory().await.unwrap();
        store.add_student("2001".into(), "Thandi Nkosi".into()).await.unwrap();
        store.add_student("2002".into(), "Pieter Botha".into()).await.unwrap();
        let session_id = store
            .add_session(
                "CS101".into(),
                "L1".into(),
                Weekday::Mon,
                t("10:00"),
                t("11:00"),
                "B2-L14".into(),
            )
            .await
            .unwrap();
        store.add_registration("2001".into(), "CS101".into()).await.unwrap();
        store.add_registration("2002".into(), "CS101".into()).await.unwrap();
        (store, session_id)
    }

    #[tokio::test]
    async fn test_embedding_blob_round_trip() {
        let (store, _) = seeded_store().await;
        let embedding = Embedding {
            values: vec![0.25, -1.5, 3.75e-3, f32::MIN_POSITIVE],
            model_version: None,
        };
        store
            .set_embedding("2001".into(), &embedding, Some("faces/2001.jpg".into()))
            .await
            .unwrap();

        let student = store.get_student("2001".into()).await.unwrap().unwrap();
        assert_eq!(student.embedding.unwrap().values, embedding.values);
        assert_eq!(student.image_path.as_deref(), Some("faces/2001.jpg"));
    }

    #[tokio::test]
    async fn test_set_embedding_unknown_student() {
        let (store, _) = seeded_store().await;
        let embedding = Embedding { values: vec![1.0], model_version: None };
        let err = store
            .set_embedding("9999".into(), &embedding, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StudentNotFound(_)));
    }

    #[tokio::test]
    async fn test_roster_deduplicates_registrations() {
        let (store, session_id) = seeded_store().await;
        // Second registration row for the same student and course.
        store.add_registration("2001".into(), "CS101".into()).await.unwrap();

        let session = store.get_session(session_id).await.unwrap();
        let roster = store.roster_for(&session).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].student_number, "2001");
        assert_eq!(roster[1].student_number, "2002");
    }

    #[tokio::test]
    async fn test_roster_includes_students_without_embeddings() {
        let (store, session_id) = seeded_store().await;
        let session = store.get_session(session_id).await.unwrap();
        let roster = store.roster_for(&session).await.unwrap();
        assert!(roster.iter().all(|s| s.embedding.is_none()));
        assert_eq!(roster.len(), 2);
    }

    #[tokio::test]
    async fn test_record_attendance_is_idempotent_per_day() {
        let (store, session_id) = seeded_store().await;
        let at = NaiveDate::from_ymd_opt(2025, 9, 1)
            .unwrap()
            .and_time(t("10:15"));

        let first = store
            .record_attendance(session_id, "2001".into(), at)
            .await
            .unwrap();
        assert!(matches!(first, RecordOutcome::Recorded(_)));

        let second = store
            .record_attendance(session_id, "2001".into(), at + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(second, RecordOutcome::Duplicate));

        let records = store.attendance_on(at.date()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].student_number, "2001");
        assert_eq!(records[0].status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_same_student_next_day_records_again() {
        let (store, session_id) = seeded_store().await;
        let monday = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap().and_time(t("10:15"));
        let next_week = monday + chrono::Duration::days(7);

        store.record_attendance(session_id, "2001".into(), monday).await.unwrap();
        let again = store
            .record_attendance(session_id, "2001".into(), next_week)
            .await
            .unwrap();
        assert!(matches!(again, RecordOutcome::Recorded(_)));
    }

    #[tokio::test]
    async fn test_different_students_same_session_both_record() {
        let (store, session_id) = seeded_store().await;
        let at = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap().and_time(t("10:15"));

        let a = store.record_attendance(session_id, "2001".into(), at).await.unwrap();
        let b = store.record_attendance(session_id, "2002".into(), at).await.unwrap();
        assert!(matches!(a, RecordOutcome::Recorded(_)));
        assert!(matches!(b, RecordOutcome::Recorded(_)));
    }

    #[tokio::test]
    async fn test_sessions_on_filters_by_weekday() {
        let (store, _) = seeded_store().await;
        store
            .add_session("CS102".into(), "L1".into(), Weekday::Tue, t("09:00"), t("10:00"), "A1".into())
            .await
            .unwrap();

        let monday = store.sessions_on(Weekday::Mon).await.unwrap();
        assert_eq!(monday.len(), 1);
        assert_eq!(monday[0].course_code, "CS101");
        let tuesday = store.sessions_on(Weekday::Tue).await.unwrap();
        assert_eq!(tuesday.len(), 1);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let (store, session_id) = seeded_store().await;
        let session = store.get_session(session_id).await.unwrap();
        assert_eq!(session.weekday, Weekday::Mon);
        assert_eq!(session.start, t("10:00"));
        assert_eq!(session.end, t("11:00"));
        assert_eq!(session.venue, "B2-L14");
    }

    #[tokio::test]
    async fn test_add_student_preserves_embedding_on_rename() {
        let (store, _) = seeded_store().await;
        let embedding = Embedding { values: vec![1.0, 2.0], model_version: None };
        store.set_embedding("2001".into(), &embedding, None).await.unwrap();

        // Administrative re-insert (name fix) must not clear the embedding.
        store.add_student("2001".into(), "Thandi M. Nkosi".into()).await.unwrap();
        let student = store.get_student("2001".into()).await.unwrap().unwrap();
        assert_eq!(student.name, "Thandi M. Nkosi");
        assert!(student.embedding.is_some());
    }
}
