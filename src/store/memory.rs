use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_worker_job::{Job, JobId, JobStatus, DEFAULT_MAX_ATTEMPTS};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::trace;

use super::{
    validate_new_job, InsertedJob, JobCounts, JobFilter, JobStore, Page, LEASE_EXPIRED_ERROR,
};
use crate::errors::{OutboxError, Result};
use crate::JobSpec;

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    keys: HashMap<String, JobId>,
}

/// In-process job store.
///
/// Leasing follows the same optimistic protocol as the database: candidates
/// are picked under a read lock, then each one is claimed with a
/// compare-and-swap that re-checks the row under the write lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<RwLock<State>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.jobs.is_empty()
    }

    async fn release(
        &self,
        job_id: JobId,
        worker_id: &str,
        transition: impl FnOnce(&mut Job, DateTime<Utc>) + Send,
    ) -> Result<Option<Job>> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.is_owned_by(worker_id) => {
                transition(job, Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(
        &self,
        job_type: &str,
        payload: Value,
        spec: &JobSpec,
    ) -> Result<InsertedJob> {
        validate_new_job(job_type, spec)?;
        let mut state = self.state.write().await;

        if let Some(key) = spec.job_key() {
            if let Some(existing) = state.keys.get(key).and_then(|id| state.jobs.get(id)) {
                return Ok(InsertedJob::Existing(existing.clone()));
            }
        }

        let now = Utc::now();
        let mut builder = Job::builder()
            .job_type(job_type)
            .payload(payload)
            .max_attempts(spec.max_attempts().unwrap_or(DEFAULT_MAX_ATTEMPTS))
            .scheduled_for(spec.scheduled_for().unwrap_or(now))
            .created_at(now)
            .updated_at(now);
        if let Some(key) = spec.job_key() {
            builder = builder.key(key.clone());
        }
        let job = builder.build();

        if let Some(key) = job.key() {
            state.keys.insert(key.clone(), *job.id());
        }
        state.jobs.insert(*job.id(), job.clone());

        Ok(InsertedJob::Created(job))
    }

    async fn lease_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        lease_duration: Duration,
    ) -> Result<Vec<Job>> {
        let now = Utc::now();
        let locked_until = after(now, lease_duration);

        let candidates: Vec<(JobId, DateTime<Utc>)> = {
            let state = self.state.read().await;
            let mut runnable: Vec<&Job> = state
                .jobs
                .values()
                .filter(|job| job.is_leasable_at(now))
                .collect();
            runnable.sort_by_key(|job| (*job.scheduled_for(), *job.id()));
            runnable
                .into_iter()
                .take(limit)
                .map(|job| (*job.id(), *job.updated_at()))
                .collect()
        };

        let mut leased = Vec::with_capacity(candidates.len());
        for (job_id, seen_updated_at) in candidates {
            let mut state = self.state.write().await;
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            if *job.updated_at() != seen_updated_at || !job.is_leasable_at(now) {
                trace!(%job_id, worker_id, "Job claimed by another worker, skipping");
                continue;
            }
            job.lease(worker_id, now, locked_until);
            leased.push(job.clone());
        }

        Ok(leased)
    }

    async fn fail_expired_leases(&self) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let reaped: Vec<Job> = state
            .jobs
            .values_mut()
            .filter(|job| {
                *job.status() == JobStatus::Processing
                    && !job.is_locked_at(now)
                    && !job.has_attempts_left()
            })
            .map(|job| {
                job.fail(LEASE_EXPIRED_ERROR, now);
                job.clone()
            })
            .collect();
        Ok(reaped)
    }

    async fn complete_job(&self, job_id: JobId, worker_id: &str) -> Result<Option<Job>> {
        self.release(job_id, worker_id, |job, now| job.complete(now))
            .await
    }

    async fn reschedule_job(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: &str,
        delay: Duration,
    ) -> Result<Option<Job>> {
        self.release(job_id, worker_id, |job, now| {
            job.reschedule(error, now, after(now, delay))
        })
        .await
    }

    async fn fail_job(&self, job_id: JobId, worker_id: &str, error: &str) -> Result<Option<Job>> {
        self.release(job_id, worker_id, |job, now| job.fail(error, now))
            .await
    }

    async fn retry_failed_job(&self, job_id: JobId) -> Result<Job> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(OutboxError::JobNotFound(job_id))?;

        if *job.status() != JobStatus::Failed {
            return Err(OutboxError::NotRetryable {
                job_id,
                status: *job.status(),
            });
        }

        job.requeue(Utc::now());
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<&Job> = state.jobs.values().filter(|job| filter.matches(job)).collect();
        jobs.sort_by(|a, b| {
            b.created_at()
                .cmp(a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        Ok(jobs
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect())
    }

    async fn count_jobs_by_status(&self) -> Result<JobCounts> {
        let state = self.state.read().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            counts.add(*job.status(), 1);
        }
        Ok(counts)
    }
}
