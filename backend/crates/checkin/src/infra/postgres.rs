//! PostgreSQL Repository Implementations
//!
//! Inserts use `ON CONFLICT DO NOTHING` so a unique-key collision reports
//! zero affected rows instead of raising `23505`, which would abort the
//! surrounding transaction. Transactions run at READ COMMITTED: under
//! concurrent inserts of the same key the loser waits for the winner, sees
//! the conflict, and its next statement reads the committed row.

use crate::domain::entities::{Attendance, AttendanceCode, Occurrence};
use crate::domain::repository::{
    AddOutcome, AttendanceCodeFilter, AttendanceFilter, Entity, MutableRepository,
    OccurrenceFilter, Repository, Store, StoreTransaction,
};
use crate::domain::value_objects::Code;
use crate::error::{CheckinError, CheckinResult};
use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{AttendanceCodeId, AttendanceId, OccurrenceId};
use platform::rate_limit::{FailureCounterStore, FailureWindow, RateLimitError, SubjectKey};
use sqlx::postgres::PgQueryResult;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

const OCCURRENCE_COLUMNS: &str =
    "occurrence_id, group_id, occurrence_date, schedule_id, location_id, created_at";
const ATTENDANCE_COLUMNS: &str =
    "attendance_id, occurrence_id, person_id, start_at, end_at, attendance_code_id";
const CODE_COLUMNS: &str = "attendance_code_id, issue_date, code, attendance_id, created_at";

/// PostgreSQL-backed check-in store
#[derive(Clone)]
pub struct PgCheckinStore {
    pool: PgPool,
}

impl PgCheckinStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Delete codes issued before `date`. Attendance rows keep their history;
    /// the foreign key nulls their code reference.
    pub async fn purge_codes_before(&self, date: NaiveDate) -> CheckinResult<u64> {
        let deleted = sqlx::query("DELETE FROM attendance_codes WHERE issue_date < $1")
            .bind(date)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::info!(before = %date, codes = deleted, "Purged stale attendance codes");

        Ok(deleted)
    }
}

impl Store for PgCheckinStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> CheckinResult<PgTransaction> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        Ok(PgTransaction { inner: Some(tx) })
    }
}

/// Open PostgreSQL transaction
///
/// Dropping it without commit rolls it back (sqlx queues the rollback on
/// the connection before it returns to the pool).
pub struct PgTransaction {
    inner: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> CheckinResult<&mut PgConnection> {
        self.inner
            .as_deref_mut()
            .ok_or(CheckinError::NoTransactionInProgress)
    }
}

impl StoreTransaction for PgTransaction {
    async fn commit(&mut self) -> CheckinResult<()> {
        let tx = self
            .inner
            .take()
            .ok_or(CheckinError::NoTransactionInProgress)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> CheckinResult<()> {
        // A failed commit already consumed the transaction
        if let Some(tx) = self.inner.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn add_outcome(result: PgQueryResult) -> AddOutcome {
    if result.rows_affected() == 0 {
        AddOutcome::Conflict
    } else {
        AddOutcome::Added
    }
}

fn ensure_updated<E: Entity>(result: PgQueryResult, id: E::Id) -> CheckinResult<()> {
    if result.rows_affected() == 0 {
        return Err(CheckinError::Internal(format!(
            "{} row {} not found",
            E::KIND,
            id
        )));
    }
    Ok(())
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ============================================================================
// Occurrences
// ============================================================================

impl Repository<Occurrence> for PgTransaction {
    async fn get(&mut self, id: OccurrenceId) -> CheckinResult<Option<Occurrence>> {
        let row = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM occurrences WHERE occurrence_id = $1"
        ))
        .bind(id.into_uuid())
        .fetch_optional(self.conn()?)
        .await?;

        Ok(row.map(OccurrenceRow::into_occurrence))
    }

    async fn add(&mut self, occurrence: &Occurrence) -> CheckinResult<AddOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO occurrences (
                occurrence_id,
                group_id,
                occurrence_date,
                schedule_id,
                location_id,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(occurrence.id.into_uuid())
        .bind(occurrence.group_id.into_uuid())
        .bind(occurrence.occurrence_date)
        .bind(occurrence.schedule_id.into_uuid())
        .bind(occurrence.location_id.map(|id| id.into_uuid()))
        .bind(occurrence.created_at)
        .execute(self.conn()?)
        .await?;

        Ok(add_outcome(result))
    }

    async fn find(&mut self, filter: &OccurrenceFilter) -> CheckinResult<Vec<Occurrence>> {
        let rows = match filter {
            OccurrenceFilter::Key(key) => {
                sqlx::query_as::<_, OccurrenceRow>(&format!(
                    r#"
                    SELECT {OCCURRENCE_COLUMNS} FROM occurrences
                    WHERE group_id = $1 AND occurrence_date = $2 AND schedule_id = $3
                    "#
                ))
                .bind(key.group_id.into_uuid())
                .bind(key.occurrence_date)
                .bind(key.schedule_id.into_uuid())
                .fetch_all(self.conn()?)
                .await?
            }
        };

        Ok(rows.into_iter().map(OccurrenceRow::into_occurrence).collect())
    }
}

// ============================================================================
// Attendances
// ============================================================================

impl Repository<Attendance> for PgTransaction {
    async fn get(&mut self, id: AttendanceId) -> CheckinResult<Option<Attendance>> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances WHERE attendance_id = $1"
        ))
        .bind(id.into_uuid())
        .fetch_optional(self.conn()?)
        .await?;

        Ok(row.map(AttendanceRow::into_attendance))
    }

    async fn add(&mut self, attendance: &Attendance) -> CheckinResult<AddOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendances (
                attendance_id,
                occurrence_id,
                person_id,
                start_at,
                end_at,
                attendance_code_id
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(attendance.id.into_uuid())
        .bind(attendance.occurrence_id.into_uuid())
        .bind(attendance.person_id.into_uuid())
        .bind(attendance.start_at)
        .bind(attendance.end_at)
        .bind(attendance.attendance_code_id.map(|id| id.into_uuid()))
        .execute(self.conn()?)
        .await?;

        Ok(add_outcome(result))
    }

    async fn find(&mut self, filter: &AttendanceFilter) -> CheckinResult<Vec<Attendance>> {
        let rows = match filter {
            AttendanceFilter::Open {
                occurrence_id,
                person_id,
            } => {
                sqlx::query_as::<_, AttendanceRow>(&format!(
                    r#"
                    SELECT {ATTENDANCE_COLUMNS} FROM attendances
                    WHERE occurrence_id = $1 AND person_id = $2 AND end_at IS NULL
                    ORDER BY start_at DESC
                    "#
                ))
                .bind(occurrence_id.into_uuid())
                .bind(person_id.into_uuid())
                .fetch_all(self.conn()?)
                .await?
            }
            AttendanceFilter::OpenForOccurrence(occurrence_id) => {
                sqlx::query_as::<_, AttendanceRow>(&format!(
                    r#"
                    SELECT {ATTENDANCE_COLUMNS} FROM attendances
                    WHERE occurrence_id = $1 AND end_at IS NULL
                    ORDER BY start_at DESC
                    "#
                ))
                .bind(occurrence_id.into_uuid())
                .fetch_all(self.conn()?)
                .await?
            }
            AttendanceFilter::ForPerson { person_id, limit } => {
                sqlx::query_as::<_, AttendanceRow>(&format!(
                    r#"
                    SELECT {ATTENDANCE_COLUMNS} FROM attendances
                    WHERE person_id = $1
                    ORDER BY start_at DESC
                    LIMIT $2
                    "#
                ))
                .bind(person_id.into_uuid())
                .bind(limit_param(*limit))
                .fetch_all(self.conn()?)
                .await?
            }
            AttendanceFilter::StartedSince { since, limit } => {
                sqlx::query_as::<_, AttendanceRow>(&format!(
                    r#"
                    SELECT {ATTENDANCE_COLUMNS} FROM attendances
                    WHERE start_at >= $1
                    ORDER BY start_at DESC
                    LIMIT $2
                    "#
                ))
                .bind(*since)
                .bind(limit_param(*limit))
                .fetch_all(self.conn()?)
                .await?
            }
        };

        Ok(rows.into_iter().map(AttendanceRow::into_attendance).collect())
    }
}

impl MutableRepository<Attendance> for PgTransaction {
    async fn update(&mut self, attendance: &Attendance) -> CheckinResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE attendances
            SET end_at = $2, attendance_code_id = $3
            WHERE attendance_id = $1
            "#,
        )
        .bind(attendance.id.into_uuid())
        .bind(attendance.end_at)
        .bind(attendance.attendance_code_id.map(|id| id.into_uuid()))
        .execute(self.conn()?)
        .await?;

        ensure_updated::<Attendance>(result, attendance.id)
    }
}

// ============================================================================
// Attendance codes
// ============================================================================

impl Repository<AttendanceCode> for PgTransaction {
    async fn get(&mut self, id: AttendanceCodeId) -> CheckinResult<Option<AttendanceCode>> {
        let row = sqlx::query_as::<_, AttendanceCodeRow>(&format!(
            "SELECT {CODE_COLUMNS} FROM attendance_codes WHERE attendance_code_id = $1"
        ))
        .bind(id.into_uuid())
        .fetch_optional(self.conn()?)
        .await?;

        row.map(AttendanceCodeRow::into_code).transpose()
    }

    async fn add(&mut self, code: &AttendanceCode) -> CheckinResult<AddOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_codes (
                attendance_code_id,
                issue_date,
                code,
                attendance_id,
                created_at
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(code.id.into_uuid())
        .bind(code.issue_date)
        .bind(code.code.as_str())
        .bind(code.attendance_id.map(|id| id.into_uuid()))
        .bind(code.created_at)
        .execute(self.conn()?)
        .await?;

        Ok(add_outcome(result))
    }

    async fn find(&mut self, filter: &AttendanceCodeFilter) -> CheckinResult<Vec<AttendanceCode>> {
        let rows = match filter {
            AttendanceCodeFilter::Exact { issue_date, code } => {
                sqlx::query_as::<_, AttendanceCodeRow>(&format!(
                    r#"
                    SELECT {CODE_COLUMNS} FROM attendance_codes
                    WHERE issue_date = $1 AND code = $2
                    "#
                ))
                .bind(*issue_date)
                .bind(code.as_str())
                .fetch_all(self.conn()?)
                .await?
            }
            AttendanceCodeFilter::Prefix {
                issue_date,
                prefix,
                limit,
            } => {
                // Normalized codes are alphanumeric, so no LIKE escaping
                sqlx::query_as::<_, AttendanceCodeRow>(&format!(
                    r#"
                    SELECT {CODE_COLUMNS} FROM attendance_codes
                    WHERE issue_date = $1 AND code LIKE $2
                    ORDER BY code
                    LIMIT $3
                    "#
                ))
                .bind(*issue_date)
                .bind(format!("{}%", prefix.as_str()))
                .bind(limit_param(*limit))
                .fetch_all(self.conn()?)
                .await?
            }
        };

        rows.into_iter().map(AttendanceCodeRow::into_code).collect()
    }
}

impl MutableRepository<AttendanceCode> for PgTransaction {
    async fn update(&mut self, code: &AttendanceCode) -> CheckinResult<()> {
        let result = sqlx::query(
            "UPDATE attendance_codes SET attendance_id = $2 WHERE attendance_code_id = $1",
        )
        .bind(code.id.into_uuid())
        .bind(code.attendance_id.map(|id| id.into_uuid()))
        .execute(self.conn()?)
        .await?;

        ensure_updated::<AttendanceCode>(result, code.id)
    }
}

// ============================================================================
// Pickup failure counters
// ============================================================================

/// Failure counters shared by every service instance
#[derive(Clone)]
pub struct PgFailureCounterStore {
    pool: PgPool,
}

impl PgFailureCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl FailureCounterStore for PgFailureCounterStore {
    async fn increment(
        &self,
        key: &SubjectKey,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<FailureWindow, RateLimitError> {
        // Window reset and increment happen in one statement
        let row = sqlx::query_as::<_, FailureWindowRow>(
            r#"
            INSERT INTO pickup_failure_counters (subject_hash, failure_count, window_start_ms)
            VALUES ($1, 1, $2)
            ON CONFLICT (subject_hash) DO UPDATE SET
                failure_count = CASE
                    WHEN pickup_failure_counters.window_start_ms + $3 <= $2 THEN 1
                    ELSE pickup_failure_counters.failure_count + 1
                END,
                window_start_ms = CASE
                    WHEN pickup_failure_counters.window_start_ms + $3 <= $2 THEN $2
                    ELSE pickup_failure_counters.window_start_ms
                END
            RETURNING failure_count, window_start_ms
            "#,
        )
        .bind(key.as_bytes().as_slice())
        .bind(now_ms)
        .bind(window_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(RateLimitError::store)?;

        Ok(row.into_window())
    }

    async fn get(&self, key: &SubjectKey) -> Result<Option<FailureWindow>, RateLimitError> {
        let row = sqlx::query_as::<_, FailureWindowRow>(
            r#"
            SELECT failure_count, window_start_ms
            FROM pickup_failure_counters
            WHERE subject_hash = $1
            "#,
        )
        .bind(key.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(RateLimitError::store)?;

        Ok(row.map(FailureWindowRow::into_window))
    }

    async fn clear(&self, key: &SubjectKey) -> Result<(), RateLimitError> {
        sqlx::query("DELETE FROM pickup_failure_counters WHERE subject_hash = $1")
            .bind(key.as_bytes().as_slice())
            .execute(&self.pool)
            .await
            .map_err(RateLimitError::store)?;
        Ok(())
    }

    async fn purge_expired(&self, now_ms: i64, window_ms: i64) -> Result<u64, RateLimitError> {
        let deleted = sqlx::query(
            "DELETE FROM pickup_failure_counters WHERE window_start_ms + $2 <= $1",
        )
        .bind(now_ms)
        .bind(window_ms)
        .execute(&self.pool)
        .await
        .map_err(RateLimitError::store)?
        .rows_affected();

        tracing::info!(counters = deleted, "Purged expired pickup failure counters");

        Ok(deleted)
    }
}

// ============================================================================
// Row types for SQLx
// ============================================================================

#[derive(sqlx::FromRow)]
struct OccurrenceRow {
    occurrence_id: Uuid,
    group_id: Uuid,
    occurrence_date: NaiveDate,
    schedule_id: Uuid,
    location_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl OccurrenceRow {
    fn into_occurrence(self) -> Occurrence {
        Occurrence {
            id: self.occurrence_id.into(),
            group_id: self.group_id.into(),
            occurrence_date: self.occurrence_date,
            schedule_id: self.schedule_id.into(),
            location_id: self.location_id.map(Into::into),
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttendanceRow {
    attendance_id: Uuid,
    occurrence_id: Uuid,
    person_id: Uuid,
    start_at: DateTime<Utc>,
    end_at: Option<DateTime<Utc>>,
    attendance_code_id: Option<Uuid>,
}

impl AttendanceRow {
    fn into_attendance(self) -> Attendance {
        Attendance {
            id: self.attendance_id.into(),
            occurrence_id: self.occurrence_id.into(),
            person_id: self.person_id.into(),
            start_at: self.start_at,
            end_at: self.end_at,
            attendance_code_id: self.attendance_code_id.map(Into::into),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttendanceCodeRow {
    attendance_code_id: Uuid,
    issue_date: NaiveDate,
    code: String,
    attendance_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl AttendanceCodeRow {
    fn into_code(self) -> CheckinResult<AttendanceCode> {
        let code = Code::normalize(&self.code).ok_or_else(|| {
            CheckinError::Internal(format!(
                "stored attendance code {} is malformed",
                self.attendance_code_id
            ))
        })?;
        Ok(AttendanceCode {
            id: self.attendance_code_id.into(),
            issue_date: self.issue_date,
            code,
            attendance_id: self.attendance_id.map(Into::into),
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FailureWindowRow {
    failure_count: i32,
    window_start_ms: i64,
}

impl FailureWindowRow {
    fn into_window(self) -> FailureWindow {
        FailureWindow {
            count: u32::try_from(self.failure_count).unwrap_or(0),
            window_start_ms: self.window_start_ms,
        }
    }
}
