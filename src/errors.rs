use outbox_worker_job::{JobId, JobStatus};
use outbox_worker_migrations::MigrateError;
use thiserror::Error;

/// Errors returned by the store, the producers and the operator surface.
///
/// Handler failures never show up here: the dispatcher turns them into a
/// status transition and a `last_error` on the job.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// An error occurred while executing an SQL query
    #[error("Error occurred while querying: {0}")]
    Sql(#[from] sqlx::Error),

    /// A payload could not be serialized to JSON
    #[error("Error while serializing payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error occurred while migrating the database schema: {0}")]
    Migrate(#[from] MigrateError),

    /// The enqueue request itself is invalid (empty job type, `max_attempts < 1`...)
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job '{0}' not found")]
    JobNotFound(JobId),

    /// Only `failed` jobs can be retried by an operator
    #[error("Job '{job_id}' is {status}, only failed jobs can be retried")]
    NotRetryable { job_id: JobId, status: JobStatus },
}

pub type Result<T> = core::result::Result<T, OutboxError>;
