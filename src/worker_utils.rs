use std::sync::Arc;

use outbox_worker_job::{Job, JobId};
use outbox_worker_task_handler::TaskHandler;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::errors::Result;
use crate::store::{InsertedJob, JobCounts, JobFilter, JobStore, Page, PgJobStore};
use crate::JobSpec;

/// Enqueueing and operator access to a job store.
///
/// This is what producers (request handlers, cron endpoints) and the
/// monitoring UI use. It never runs handlers and has no way to mark a job
/// `completed`.
#[derive(Clone)]
pub struct WorkerUtils {
    store: Arc<dyn JobStore>,
}

impl WorkerUtils {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn from_store<S: JobStore>(store: S) -> Self {
        Self::new(Arc::new(store))
    }

    /// PostgreSQL-backed utils on `schema`, migrated if needed.
    pub async fn connect(pg_pool: PgPool, schema: &str) -> Result<Self> {
        Ok(Self::from_store(PgJobStore::connect(pg_pool, schema).await?))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Enqueues a job for the handler `T`.
    ///
    /// # Example
    /// ```no_run
    /// # use outbox_worker::{IntoTaskHandlerResult, JobSpec, TaskHandler, WorkerContext, WorkerUtils};
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Deserialize, Serialize)]
    /// # struct SendOfferEmail { contact_id: String }
    /// # impl TaskHandler for SendOfferEmail {
    /// #     const IDENTIFIER: &'static str = "send_offer_email";
    /// #     async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult { Ok::<(), String>(()) }
    /// # }
    /// # async fn example(utils: WorkerUtils) -> Result<(), Box<dyn std::error::Error>> {
    /// let job = utils
    ///     .add_job(SendOfferEmail { contact_id: "C1".into() }, JobSpec::default())
    ///     .await?;
    /// println!("enqueued {}", job.id());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_job<T: TaskHandler>(&self, payload: T, spec: JobSpec) -> Result<Job> {
        let payload = serde_json::to_value(payload)?;
        self.add_raw_job(T::IDENTIFIER, payload, spec).await
    }

    /// Enqueues a job from its type and raw payload.
    ///
    /// With a `job_key` that already exists, nothing is inserted and the
    /// existing job is returned.
    pub async fn add_raw_job(&self, job_type: &str, payload: Value, spec: JobSpec) -> Result<Job> {
        Ok(self.insert_raw_job(job_type, payload, spec).await?.into_job())
    }

    /// Like [`WorkerUtils::add_raw_job`], telling apart a new job from an
    /// existing one with the same key.
    pub async fn insert_raw_job(
        &self,
        job_type: &str,
        payload: Value,
        spec: JobSpec,
    ) -> Result<InsertedJob> {
        let inserted = self.store.insert_job(job_type, payload, &spec).await?;
        let job = inserted.job();
        if inserted.is_created() {
            info!(
                job_id = %job.id(),
                job_type,
                max_attempts = *job.max_attempts(),
                scheduled_for = %job.scheduled_for(),
                "Job enqueued"
            );
        } else {
            debug!(
                job_id = %job.id(),
                job_type,
                job_key = ?job.key(),
                "Job key already present, nothing enqueued"
            );
        }

        Ok(inserted)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.store.get_job(job_id).await
    }

    /// Jobs matching `filter`, newest first.
    pub async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        self.store.list_jobs(filter, page).await
    }

    pub async fn count_jobs_by_status(&self) -> Result<JobCounts> {
        self.store.count_jobs_by_status().await
    }

    /// Operator retry of a failed job: back to `pending`, due now.
    ///
    /// The attempt count is kept, so a job that exhausted its attempts gets
    /// exactly one more run before failing again.
    ///
    /// # Errors
    /// `JobNotFound` for an unknown id, `NotRetryable` if the job is not
    /// `failed` (a second retry of the same job is rejected this way).
    pub async fn retry_job(&self, job_id: JobId) -> Result<Job> {
        let job = self.store.retry_failed_job(job_id).await?;
        info!(
            job_id = %job_id,
            job_type = %job.job_type(),
            attempts = *job.attempts(),
            "Failed job queued again by operator"
        );
        Ok(job)
    }
}
