use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use getset::Getters;
use outbox_worker_ctx::{Extensions, WorkerContext};
use outbox_worker_job::{Job, JobId};
use outbox_worker_task_handler::{spawn_task, RunTaskError, SpawnTaskResult, TaskError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

use crate::backoff::BackoffPolicy;
use crate::builder::WorkerOptions;
use crate::errors::OutboxError;
use crate::store::JobStore;
use crate::streams::{job_signal_stream, job_stream, StreamSource};
use crate::worker_utils::WorkerUtils;

/// A registered handler: takes the context of a leased job, resolves to the
/// handler's outcome.
pub type WorkerFn =
    Box<dyn Fn(WorkerContext) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Leases due jobs from the store and runs their handlers.
///
/// Any number of workers, in one process or many, can share a store: each
/// job is owned by at most one of them at a time through its lease.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker {
    /// Unique identifier for this worker instance, written to `locked_by`
    pub(crate) worker_id: String,
    pub(crate) concurrency: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) lease_duration: Duration,
    pub(crate) handler_timeout: Duration,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) store_error_backoff: Duration,
    pub(crate) shutdown_grace_period: Duration,
    /// Handler registry, keyed by job type
    #[getset(skip)]
    pub(crate) jobs: HashMap<String, WorkerFn>,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) extensions: Extensions,
    pub(crate) shutdown_token: CancellationToken,
}

impl Worker {
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    /// Polls the store and runs jobs until shutdown.
    ///
    /// Store failures never stop the loop: they are logged and polling
    /// resumes after `store_error_backoff`.
    pub async fn run(&self) {
        info!(worker_id = %self.worker_id, concurrency = self.concurrency, "Worker started");

        job_signal_stream(
            self.poll_interval,
            self.shutdown_token.clone(),
            self.concurrency,
        )
        .for_each_concurrent(self.concurrency, |source| async move {
            if source == StreamSource::Polling {
                if let Err(e) = self.reap_expired_leases().await {
                    error!(error = %e, "Could not fail expired leases");
                    self.pause_after_store_error().await;
                    return;
                }
            }

            match process_one_job(self, source).await {
                Ok(Some(job)) => debug!(job_id = %job.id(), "Job processed"),
                Ok(None) => (),
                Err(e) => {
                    error!(error = %e, "Error while processing job");
                    self.pause_after_store_error().await;
                }
            }
        })
        .await;

        info!(worker_id = %self.worker_id, "Worker stopped");
    }

    /// Runs every due job, then returns.
    ///
    /// Jobs that become due again while draining (retries with no backoff)
    /// are run too. Unlike [`Worker::run`], the first store error is returned.
    pub async fn run_once(&self) -> Result<(), ProcessJobError> {
        loop {
            self.reap_expired_leases().await?;

            let processed = AtomicUsize::new(0);
            job_stream(
                self.store.clone(),
                self.worker_id.clone(),
                self.lease_duration,
                self.shutdown_token.clone(),
            )
            .map_err(ProcessJobError::from)
            .try_for_each_concurrent(self.concurrency, |job| {
                let processed = &processed;
                async move {
                    let job_id = *job.id();
                    run_and_release_job(job, self, &StreamSource::RunOnce).await?;
                    processed.fetch_add(1, Ordering::Relaxed);
                    debug!(job_id = %job_id, "Job processed");
                    Ok(())
                }
            })
            .await?;

            if processed.into_inner() == 0 || self.shutdown_token.is_cancelled() {
                return Ok(());
            }
        }
    }

    pub fn create_utils(&self) -> WorkerUtils {
        WorkerUtils::new(self.store.clone())
    }

    /// Stops `run`/`run_once`. Running handlers get the shutdown grace period
    /// to finish.
    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }

    async fn reap_expired_leases(&self) -> Result<(), OutboxError> {
        for job in self.store.fail_expired_leases().await? {
            error!(
                job_id = %job.id(),
                job_type = %job.job_type(),
                attempts = *job.attempts(),
                locked_by = ?job.locked_by(),
                "Lease expired on final attempt, job failed"
            );
        }
        Ok(())
    }

    async fn pause_after_store_error(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.store_error_backoff) => (),
            _ = self.shutdown_token.cancelled() => (),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessJobError {
    #[error("An error occurred while releasing a job: '{0}'")]
    ReleaseJobError(#[from] ReleaseJobError),
    #[error("An error occurred while fetching a job to run: '{0}'")]
    GetJobError(#[from] OutboxError),
}

async fn process_one_job(
    worker: &Worker,
    source: StreamSource,
) -> Result<Option<Job>, ProcessJobError> {
    let job = worker
        .store
        .lease_jobs(&worker.worker_id, 1, worker.lease_duration)
        .await?
        .pop();

    match job {
        Some(job) => {
            run_and_release_job(job.clone(), worker, &source).await?;
            Ok(Some(job))
        }
        None => {
            trace!(source = ?source, "No job found");
            Ok(None)
        }
    }
}

async fn run_and_release_job(
    job: Job,
    worker: &Worker,
    source: &StreamSource,
) -> Result<(), ProcessJobError> {
    let job_result = run_job(&job, worker, source).await;

    release_job(job_result, &job, worker)
        .await
        .map_err(|e| {
            error!("Release job error : {:?}", e);
            e
        })?;
    Ok(())
}

#[derive(Error, Debug)]
enum RunJobError {
    /// No handler registered; the job can never succeed on this deployment
    #[error("unknown job_type")]
    UnknownJobType(String),
    #[error("{0}")]
    Task(#[from] RunTaskError),
}

impl RunJobError {
    fn is_retryable(&self) -> bool {
        match self {
            RunJobError::UnknownJobType(_) => false,
            RunJobError::Task(e) => e.is_retryable(),
        }
    }
}

#[tracing::instrument(
    "run_job",
    skip(job, worker, source),
    fields(
        job_id = %job.id(),
        job_type = %job.job_type(),
        attempts = *job.attempts(),
        worker_id = %worker.worker_id,
    )
)]
async fn run_job(job: &Job, worker: &Worker, source: &StreamSource) -> Result<(), RunJobError> {
    let task_fn = worker
        .jobs
        .get(job.job_type().as_str())
        .ok_or_else(|| RunJobError::UnknownJobType(job.job_type().clone()))?;

    debug!(source = ?source, "Found task");

    let worker_ctx = WorkerContext::builder()
        .payload(job.payload().clone())
        .job(job.clone())
        .worker_id(worker.worker_id.clone())
        .extensions(worker.extensions.clone())
        .shutdown_token(worker.shutdown_token.clone())
        .build();

    let task_fut = task_fn(worker_ctx).instrument(Span::current());

    let SpawnTaskResult { duration, result } = spawn_task(
        task_fut,
        worker.handler_timeout,
        worker.shutdown_token.clone(),
        worker.shutdown_grace_period,
    )
    .await;

    if let Err(RunTaskError::TaskAborted) = &result {
        warn!(
            grace_period = ?worker.shutdown_grace_period,
            "Job interrupted by shutdown after the grace period"
        );
    }
    result?;

    info!(
        duration = duration.as_millis() as u64,
        "Completed task with success"
    );

    Ok(())
}

/// Failure to write a job's outcome back to the store.
#[derive(Error, Debug)]
#[error("Failed to release job '{job_id}'. {source}")]
pub struct ReleaseJobError {
    job_id: JobId,
    #[source]
    source: OutboxError,
}

async fn release_job(
    job_result: Result<(), RunJobError>,
    job: &Job,
    worker: &Worker,
) -> Result<(), ReleaseJobError> {
    let job_id = *job.id();
    let worker_id = worker.worker_id.as_str();

    let released = match job_result {
        Ok(()) => worker.store.complete_job(job_id, worker_id).await,
        Err(e) => {
            let message = e.to_string();

            if e.is_retryable() && job.has_attempts_left() {
                let delay = worker.backoff.delay(*job.attempts());
                warn!(
                    job_id = %job_id,
                    job_type = %job.job_type(),
                    attempts = *job.attempts(),
                    max_attempts = *job.max_attempts(),
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "Failed task, will retry"
                );
                worker
                    .store
                    .reschedule_job(job_id, worker_id, &message, delay)
                    .await
            } else {
                error!(
                    job_id = %job_id,
                    job_type = %job.job_type(),
                    attempts = *job.attempts(),
                    max_attempts = *job.max_attempts(),
                    payload = %job.payload(),
                    error = %message,
                    "Job failed permanently"
                );
                worker.store.fail_job(job_id, worker_id, &message).await
            }
        }
    }
    .map_err(|source| ReleaseJobError { job_id, source })?;

    if released.is_none() {
        warn!(
            job_id = %job_id,
            worker_id,
            "Lease lost before the job was released, outcome discarded"
        );
    }

    Ok(())
}
