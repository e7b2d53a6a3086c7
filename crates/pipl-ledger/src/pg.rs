//! # Postgres Compliance Store
//!
//! [`ComplianceStore`] over `sqlx` Postgres.
//!
//! ## Locked access update
//!
//! ```text
//! BEGIN
//!   INSERT ... ON CONFLICT (user_id, country_code) DO NOTHING   -- find-or-create
//!   SELECT ... FOR UPDATE                                      -- row lock
//!   (closure: window check + increment)
//!   UPDATE ...
//! COMMIT
//! ```
//!
//! The unique constraint turns a creation race into a no-op insert, after
//! which both callers queue on the same row lock. The loser of the race
//! sees the winner's `last_access_at` and declines.
//!
//! Lifecycle constraints are enforced in `pipl-state`, not in SQL.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use pipl_core::{CountryCode, PiplError, UserId};
use pipl_state::{CountryAccessRecord, PiplSubject, SubjectState, SubjectTransitionRecord};

use crate::store::ComplianceStore;

const ACCESS_COLUMNS: &str = "user_id, country_code, first_access_at, last_access_at, \
     access_count, access_count_reset_at, created_at, updated_at";

const SUBJECT_COLUMNS: &str = "user_id, state, initial_email_sent_at, last_tracked_at, \
     exempted_at, created_at, updated_at, transitions";

fn storage(e: sqlx::Error) -> PiplError {
    PiplError::Storage(e.to_string())
}

/// Postgres-backed [`ComplianceStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self, PiplError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(storage)?;
        tracing::info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<(), PiplError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PiplError::Storage(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ComplianceStore for PgStore {
    async fn access_records(&self, user_id: UserId) -> Result<Vec<CountryAccessRecord>, PiplError> {
        let rows = sqlx::query_as::<_, AccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM country_access_logs
             WHERE user_id = $1 ORDER BY country_code"
        ))
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(AccessRow::into_record).collect()
    }

    async fn find_access_record(
        &self,
        user_id: UserId,
        country: CountryCode,
    ) -> Result<Option<CountryAccessRecord>, PiplError> {
        let row = sqlx::query_as::<_, AccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM country_access_logs
             WHERE user_id = $1 AND country_code = $2"
        ))
        .bind(user_id.get())
        .bind(country.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(AccessRow::into_record).transpose()
    }

    async fn update_access_record_locked<F>(
        &self,
        user_id: UserId,
        country: CountryCode,
        now: DateTime<Utc>,
        f: F,
    ) -> Result<Option<CountryAccessRecord>, PiplError>
    where
        F: FnOnce(&mut CountryAccessRecord) -> bool + Send,
    {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            "INSERT INTO country_access_logs (user_id, country_code, access_count, created_at, updated_at)
             VALUES ($1, $2, 0, $3, $3)
             ON CONFLICT (user_id, country_code) DO NOTHING",
        )
        .bind(user_id.get())
        .bind(country.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let row = sqlx::query_as::<_, AccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM country_access_logs
             WHERE user_id = $1 AND country_code = $2 FOR UPDATE"
        ))
        .bind(user_id.get())
        .bind(country.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let mut record = row.into_record()?;
        if !f(&mut record) {
            // Commit keeps the freshly inserted zero row; it is harmless
            // and the next access would create it anyway.
            tx.commit().await.map_err(storage)?;
            return Ok(None);
        }

        sqlx::query(
            "UPDATE country_access_logs
             SET first_access_at = $3, last_access_at = $4, access_count = $5,
                 access_count_reset_at = $6, updated_at = $7
             WHERE user_id = $1 AND country_code = $2",
        )
        .bind(user_id.get())
        .bind(country.as_str())
        .bind(record.first_access_at)
        .bind(record.last_access_at)
        .bind(count_to_db(record.access_count))
        .bind(record.access_count_reset_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(Some(record))
    }

    async fn reset_access_records(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<usize, PiplError> {
        let result = sqlx::query(
            "UPDATE country_access_logs
             SET access_count = 0, first_access_at = NULL,
                 access_count_reset_at = $2, updated_at = $2
             WHERE user_id = $1",
        )
        .bind(user_id.get())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn has_access_records(&self, user_id: UserId) -> Result<bool, PiplError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM country_access_logs WHERE user_id = $1)",
        )
        .bind(user_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(exists)
    }

    async fn find_subject(&self, user_id: UserId) -> Result<Option<PiplSubject>, PiplError> {
        let row = sqlx::query_as::<_, SubjectRow>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM pipl_subjects WHERE user_id = $1"
        ))
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(SubjectRow::into_record).transpose()
    }

    async fn mark_subject_tracked(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<PiplSubject, PiplError> {
        let fresh = PiplSubject::new(user_id, now);
        let row = sqlx::query_as::<_, SubjectRow>(&format!(
            "INSERT INTO pipl_subjects ({SUBJECT_COLUMNS})
             VALUES ($1, $2, NULL, $3, NULL, $3, $3, '[]'::jsonb)
             ON CONFLICT (user_id) DO UPDATE
             SET last_tracked_at = EXCLUDED.last_tracked_at,
                 updated_at = EXCLUDED.updated_at
             RETURNING {SUBJECT_COLUMNS}"
        ))
        .bind(user_id.get())
        .bind(fresh.state.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        row.into_record()
    }

    async fn try_update_subject<R, E, F>(
        &self,
        user_id: UserId,
        f: F,
    ) -> Result<Option<Result<R, E>>, PiplError>
    where
        F: FnOnce(&mut PiplSubject) -> Result<R, E> + Send,
        R: Send,
        E: Send,
    {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query_as::<_, SubjectRow>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM pipl_subjects WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut subject = row.into_record()?;

        let result = f(&mut subject);
        if result.is_err() {
            tx.rollback().await.map_err(storage)?;
            return Ok(Some(result));
        }

        let transitions = serde_json::to_value(&subject.transitions)?;
        sqlx::query(
            "UPDATE pipl_subjects
             SET state = $2, initial_email_sent_at = $3, last_tracked_at = $4,
                 exempted_at = $5, updated_at = $6, transitions = $7
             WHERE user_id = $1",
        )
        .bind(user_id.get())
        .bind(subject.state.as_str())
        .bind(subject.initial_email_sent_at)
        .bind(subject.last_tracked_at)
        .bind(subject.exempted_at)
        .bind(subject.updated_at)
        .bind(&transitions)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(Some(result))
    }

    async fn subject_ids(&self) -> Result<Vec<UserId>, PiplError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT user_id FROM pipl_subjects ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(ids.into_iter().map(UserId::new).collect())
    }
}

fn count_to_db(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

// ─── Row Types ───────────────────────────────────────────────────────

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct AccessRow {
    user_id: i64,
    country_code: String,
    first_access_at: Option<DateTime<Utc>>,
    last_access_at: Option<DateTime<Utc>>,
    access_count: i32,
    access_count_reset_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccessRow {
    fn into_record(self) -> Result<CountryAccessRecord, PiplError> {
        Ok(CountryAccessRecord {
            user_id: UserId::new(self.user_id),
            country_code: CountryCode::new(self.country_code.trim())?,
            first_access_at: self.first_access_at,
            last_access_at: self.last_access_at,
            access_count: u32::try_from(self.access_count).unwrap_or(0),
            access_count_reset_at: self.access_count_reset_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct SubjectRow {
    user_id: i64,
    state: String,
    initial_email_sent_at: Option<DateTime<Utc>>,
    last_tracked_at: Option<DateTime<Utc>>,
    exempted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    transitions: serde_json::Value,
}

impl SubjectRow {
    fn into_record(self) -> Result<PiplSubject, PiplError> {
        let state: SubjectState = self.state.parse().map_err(|e| {
            PiplError::Storage(format!("pipl_subjects row for user {}: {e}", self.user_id))
        })?;

        // No lenient default here: `try_update_subject` writes the log back.
        let transitions: Vec<SubjectTransitionRecord> = serde_json::from_value(self.transitions)
            .map_err(|e| {
                PiplError::Storage(format!(
                    "pipl_subjects row for user {}: undecodable transitions: {e}",
                    self.user_id
                ))
            })?;

        Ok(PiplSubject {
            user_id: UserId::new(self.user_id),
            state,
            initial_email_sent_at: self.initial_email_sent_at,
            last_tracked_at: self.last_tracked_at,
            exempted_at: self.exempted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            transitions,
        })
    }
}
