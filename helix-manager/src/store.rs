//! Job store
//!
//! The persistence contract the orchestration loop needs, and its Postgres
//! implementation. Updates are compare-and-set on the per-row `version`
//! column so two manager processes can never double-submit or
//! double-finalize the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helix_core::{Job, JobStatus, JobType};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The row's version moved underneath us; another process owns the job
    /// for this cycle. Always recoverable: re-read next cycle.
    #[error("stale version for job update")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Partial update committed against a job row in one statement.
///
/// A transition's state change and its side-effect outputs (external id,
/// timestamps, results) travel together so a crash cannot persist one
/// without the other.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub external_job_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: Option<i32>,
    pub last_error: Option<String>,
    pub results: Option<serde_json::Value>,
}

impl JobUpdate {
    /// An empty update; still bumps the version, which is how a job row is
    /// claimed before a side-effectful operation runs.
    pub fn claim() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn external_job_id(mut self, id: impl Into<String>) -> Self {
        self.external_job_id = Some(id.into());
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn retry_count(mut self, count: i32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(message.into());
        self
    }

    pub fn results(mut self, results: serde_json::Value) -> Self {
        self.results = Some(results);
        self
    }
}

/// Persistence contract for the orchestration loop.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs in any of the given states, oldest first.
    async fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError>;

    /// Compare-and-set update: applies `update` iff the row's version equals
    /// `expected_version`, bumping it. Returns the new version.
    async fn update_job(
        &self,
        id: Uuid,
        expected_version: i64,
        update: JobUpdate,
    ) -> Result<i64, StoreError>;

    /// Records a failure against the job without advancing its state:
    /// sets `last_error` and increments `retry_count`. Not version-gated;
    /// bookkeeping writes must not race away a cycle's claim.
    async fn append_error(&self, id: Uuid, message: &str) -> Result<(), StoreError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        let status_strs: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, job_type, status, parameters, external_job_id, input_file,
                   created_at, updated_at, started_at, completed_at,
                   retry_count, last_error, results, version
            FROM jobs
            WHERE status = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&status_strs)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update_job(
        &self,
        id: Uuid,
        expected_version: i64,
        update: JobUpdate,
    ) -> Result<i64, StoreError> {
        let now = chrono::Utc::now();

        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new("UPDATE jobs SET updated_at = ");
        qb.push_bind(now);
        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(external_job_id) = update.external_job_id {
            qb.push(", external_job_id = ").push_bind(external_job_id);
        }
        if let Some(started_at) = update.started_at {
            qb.push(", started_at = ").push_bind(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            qb.push(", completed_at = ").push_bind(completed_at);
        }
        if let Some(retry_count) = update.retry_count {
            qb.push(", retry_count = ").push_bind(retry_count);
        }
        if let Some(last_error) = update.last_error {
            qb.push(", last_error = ").push_bind(last_error);
        }
        if let Some(results) = update.results {
            qb.push(", results = ").push_bind(results);
        }
        qb.push(", version = version + 1 WHERE id = ")
            .push_bind(id)
            .push(" AND version = ")
            .push_bind(expected_version);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(expected_version + 1)
    }

    async fn append_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET last_error = $1, retry_count = retry_count + 1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(message)
        .bind(chrono::Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    parameters: serde_json::Value,
    external_job_id: Option<String>,
    input_file: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    results: Option<serde_json::Value>,
    version: i64,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        // Rows with states this build does not know are quarantined as
        // Errored rather than re-run from scratch.
        let status = JobStatus::parse(&row.status).unwrap_or(JobStatus::Errored);
        let job_type = JobType::parse(&row.job_type).unwrap_or(JobType::Accession);

        let parameters = match row.parameters {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        Job {
            id: row.id,
            job_type,
            status,
            parameters,
            external_job_id: row.external_job_id,
            input_file: row.input_file,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count,
            last_error: row.last_error,
            results: row.results,
            version: row.version,
        }
    }
}

// =============================================================================
// In-memory store for tests
// =============================================================================

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test double with the same compare-and-set semantics as the Postgres
    /// store, plus write accounting and one-shot conflict injection.
    pub struct MemoryJobStore {
        jobs: Mutex<HashMap<Uuid, Job>>,
        write_count: AtomicUsize,
        conflict_next_update: Mutex<bool>,
    }

    impl MemoryJobStore {
        pub fn new(jobs: Vec<Job>) -> Self {
            Self {
                jobs: Mutex::new(jobs.into_iter().map(|j| (j.id, j)).collect()),
                write_count: AtomicUsize::new(0),
                conflict_next_update: Mutex::new(false),
            }
        }

        pub fn get(&self, id: Uuid) -> Option<Job> {
            self.jobs.lock().unwrap().get(&id).cloned()
        }

        pub fn write_count(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }

        /// Makes the next `update_job` fail with `Conflict`, as if another
        /// manager process claimed the row first.
        pub fn inject_conflict(&self) {
            *self.conflict_next_update.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl JobStore for MemoryJobStore {
        async fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
            let jobs = self.jobs.lock().unwrap();
            let mut out: Vec<Job> = jobs
                .values()
                .filter(|j| statuses.contains(&j.status))
                .cloned()
                .collect();
            out.sort_by_key(|j| j.created_at);
            Ok(out)
        }

        async fn update_job(
            &self,
            id: Uuid,
            expected_version: i64,
            update: JobUpdate,
        ) -> Result<i64, StoreError> {
            {
                let mut conflict = self.conflict_next_update.lock().unwrap();
                if *conflict {
                    *conflict = false;
                    return Err(StoreError::Conflict);
                }
            }
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).ok_or(StoreError::Conflict)?;
            if job.version != expected_version {
                return Err(StoreError::Conflict);
            }
            if let Some(status) = update.status {
                job.status = status;
            }
            if let Some(external_job_id) = update.external_job_id {
                job.external_job_id = Some(external_job_id);
            }
            if let Some(started_at) = update.started_at {
                job.started_at = Some(started_at);
            }
            if let Some(completed_at) = update.completed_at {
                job.completed_at = Some(completed_at);
            }
            if let Some(retry_count) = update.retry_count {
                job.retry_count = retry_count;
            }
            if let Some(last_error) = update.last_error {
                job.last_error = Some(last_error);
            }
            if let Some(results) = update.results {
                job.results = Some(results);
            }
            job.updated_at = chrono::Utc::now();
            job.version += 1;
            self.write_count.fetch_add(1, Ordering::SeqCst);
            Ok(job.version)
        }

        async fn append_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.get_mut(&id) {
                job.last_error = Some(message.to_string());
                job.retry_count += 1;
                job.updated_at = chrono::Utc::now();
                self.write_count.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_memory_store_version_gate() {
        let job = Job::new(helix_core::JobType::Gnn, serde_json::Map::new(), None);
        let id = job.id;
        let store = MemoryJobStore::new(vec![job]);

        let v1 = store
            .update_job(id, 0, JobUpdate::claim().status(JobStatus::Staging))
            .await
            .unwrap();
        assert_eq!(v1, 1);

        // Reusing the stale version conflicts.
        let err = store.update_job(id, 0, JobUpdate::claim()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        assert_eq!(store.get(id).unwrap().status, JobStatus::Staging);
    }
}
