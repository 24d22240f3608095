use std::time::Duration;

use async_trait::async_trait;
use outbox_worker_job::{Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{OutboxError, Result};
use crate::JobSpec;

mod memory;
mod pg;

pub use memory::MemoryJobStore;
pub use pg::PgJobStore;

/// Written to `last_error` when a job's final attempt lost its lease.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired after final attempt";

/// Checks shared by every backend before a job is inserted.
pub(crate) fn validate_new_job(job_type: &str, spec: &JobSpec) -> Result<()> {
    if job_type.is_empty() {
        return Err(OutboxError::InvalidJob("job_type must not be empty".into()));
    }
    if let Some(max_attempts) = spec.max_attempts() {
        if *max_attempts < 1 {
            return Err(OutboxError::InvalidJob(format!(
                "max_attempts must be at least 1, got {max_attempts}"
            )));
        }
    }
    Ok(())
}

/// Storage for jobs.
///
/// Every mutation is a single-row conditional update, so any number of
/// workers can share one store. Release operations (`complete_job`,
/// `reschedule_job`, `fail_job`) only apply while `worker_id` still holds the
/// lease and return `None` otherwise.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Inserts a `pending` job, or returns the existing one when
    /// `spec.job_key` is already taken.
    ///
    /// Fails with `InvalidJob` for an empty `job_type` or `max_attempts < 1`.
    async fn insert_job(&self, job_type: &str, payload: Value, spec: &JobSpec)
        -> Result<InsertedJob>;

    /// Leases up to `limit` runnable jobs for `worker_id`.
    ///
    /// Runnable means `pending` and due, or `processing` with an expired lease
    /// and attempts left. Leasing bumps `attempts`. Jobs claimed concurrently by
    /// someone else are skipped.
    async fn lease_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        lease_duration: Duration,
    ) -> Result<Vec<Job>>;

    /// Fails expired leases that already used their last attempt.
    async fn fail_expired_leases(&self) -> Result<Vec<Job>>;

    async fn complete_job(&self, job_id: JobId, worker_id: &str) -> Result<Option<Job>>;

    /// Back to `pending`, runnable again after `delay`.
    async fn reschedule_job(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: &str,
        delay: Duration,
    ) -> Result<Option<Job>>;

    async fn fail_job(&self, job_id: JobId, worker_id: &str, error: &str) -> Result<Option<Job>>;

    /// `failed -> pending`. Fails with `JobNotFound` or `NotRetryable`.
    async fn retry_failed_job(&self, job_id: JobId) -> Result<Job>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Newest first.
    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>>;

    async fn count_jobs_by_status(&self) -> Result<JobCounts>;
}

/// Result of an insert: either a new row or the row already holding the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertedJob {
    Created(Job),
    Existing(Job),
}

impl InsertedJob {
    pub fn is_created(&self) -> bool {
        matches!(self, InsertedJob::Created(_))
    }

    pub fn job(&self) -> &Job {
        match self {
            InsertedJob::Created(job) | InsertedJob::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            InsertedJob::Created(job) | InsertedJob::Existing(job) => job,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |status| *job.status() == status)
            && self
                .job_type
                .as_deref()
                .map_or(true, |job_type| job.job_type() == job_type)
    }
}

/// Offset pagination for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    limit: u32,
    offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    /// `limit` is clamped to `1..=MAX_LIMIT`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }

    /// The `number`-th page (zero based) of `size` jobs.
    pub fn nth(number: u32, size: u32) -> Self {
        let page = Self::new(size, 0);
        Self {
            offset: number.saturating_mul(page.limit),
            ..page
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl JobCounts {
    pub fn get(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        JobStatus::ALL.iter().map(|status| self.get(*status)).sum()
    }
}
