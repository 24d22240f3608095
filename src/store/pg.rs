use std::time::Duration;

use async_trait::async_trait;
use outbox_worker_job::{Job, JobId};
use outbox_worker_migrations::migrate;
use serde_json::Value;
use sqlx::PgPool;

use super::{validate_new_job, InsertedJob, JobCounts, JobFilter, JobStore, Page};
use crate::errors::{OutboxError, Result};
use crate::sql::{expire_leases, insert_job, lease_jobs, query_jobs, release_job, retry_job};
use crate::utils::escape_identifier;
use crate::JobSpec;

/// Job store backed by `<schema>.jobs` in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pg_pool: PgPool,
    escaped_schema: String,
}

impl PgJobStore {
    /// `escaped_schema` must already be quoted, see [`PgJobStore::connect`].
    pub fn new(pg_pool: PgPool, escaped_schema: String) -> Self {
        Self {
            pg_pool,
            escaped_schema,
        }
    }

    /// Quotes `schema` and brings it up to date.
    pub async fn connect(pg_pool: PgPool, schema: &str) -> Result<Self> {
        let escaped_schema = escape_identifier(&pg_pool, schema).await?;
        let store = Self::new(pg_pool, escaped_schema);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        migrate(&self.pg_pool, &self.escaped_schema).await?;
        Ok(())
    }

    pub fn pg_pool(&self) -> &PgPool {
        &self.pg_pool
    }

    pub fn escaped_schema(&self) -> &str {
        &self.escaped_schema
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(
        &self,
        job_type: &str,
        payload: Value,
        spec: &JobSpec,
    ) -> Result<InsertedJob> {
        validate_new_job(job_type, spec)?;
        let inserted =
            insert_job::insert_job(&self.pg_pool, &self.escaped_schema, job_type, &payload, spec)
                .await?;
        if let Some(inserted) = inserted {
            return Ok(inserted);
        }

        // The key was taken by a transaction that committed after our snapshot
        let existing = match spec.job_key() {
            Some(key) => insert_job::get_job_by_key(&self.pg_pool, &self.escaped_schema, key).await?,
            None => None,
        };
        existing
            .map(InsertedJob::Existing)
            .ok_or(OutboxError::Sql(sqlx::Error::RowNotFound))
    }

    async fn lease_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        lease_duration: Duration,
    ) -> Result<Vec<Job>> {
        lease_jobs::lease_jobs(
            &self.pg_pool,
            &self.escaped_schema,
            worker_id,
            limit,
            lease_duration,
        )
        .await
    }

    async fn fail_expired_leases(&self) -> Result<Vec<Job>> {
        expire_leases::fail_expired_leases(&self.pg_pool, &self.escaped_schema).await
    }

    async fn complete_job(&self, job_id: JobId, worker_id: &str) -> Result<Option<Job>> {
        release_job::complete_job(&self.pg_pool, &self.escaped_schema, job_id, worker_id).await
    }

    async fn reschedule_job(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: &str,
        delay: Duration,
    ) -> Result<Option<Job>> {
        release_job::reschedule_job(
            &self.pg_pool,
            &self.escaped_schema,
            job_id,
            worker_id,
            error,
            delay,
        )
        .await
    }

    async fn fail_job(&self, job_id: JobId, worker_id: &str, error: &str) -> Result<Option<Job>> {
        release_job::fail_job(&self.pg_pool, &self.escaped_schema, job_id, worker_id, error).await
    }

    async fn retry_failed_job(&self, job_id: JobId) -> Result<Job> {
        if let Some(job) =
            retry_job::retry_failed_job(&self.pg_pool, &self.escaped_schema, job_id).await?
        {
            return Ok(job);
        }

        match self.get_job(job_id).await? {
            Some(job) => Err(OutboxError::NotRetryable {
                job_id,
                status: *job.status(),
            }),
            None => Err(OutboxError::JobNotFound(job_id)),
        }
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        query_jobs::get_job(&self.pg_pool, &self.escaped_schema, job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        query_jobs::list_jobs(&self.pg_pool, &self.escaped_schema, filter, page).await
    }

    async fn count_jobs_by_status(&self) -> Result<JobCounts> {
        query_jobs::count_jobs_by_status(&self.pg_pool, &self.escaped_schema).await
    }
}
