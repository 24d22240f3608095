use outbox_worker::{
    JobSpec, JobSpecBuilder, JobStatus, MemoryJobStore, OutboxError, TaskError,
};
use serde_json::json;
use uuid::Uuid;

use crate::helpers::{memory_worker_options, StaticCounter};

mod helpers;

#[tokio::test]
async fn it_should_give_a_failed_job_one_more_run() {
    static CALLS: StaticCounter = StaticCounter::new();

    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store)
        .define_raw_job("send_offer_email", |_ctx| async move {
            if CALLS.increment() <= 2 {
                return Err(TaskError::retryable("mailbox full"));
            }
            Ok(())
        })
        .init()
        .await
        .unwrap();
    let utils = worker.create_utils();

    let job = utils
        .add_raw_job(
            "send_offer_email",
            json!({ "contact_id": "C1" }),
            JobSpecBuilder::new().max_attempts(2).build(),
        )
        .await
        .unwrap();

    worker.run_once().await.unwrap();
    let failed = utils.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*failed.status(), JobStatus::Failed);
    assert_eq!(*failed.attempts(), 2);

    let retried = utils.retry_job(*job.id()).await.unwrap();
    assert_eq!(*retried.status(), JobStatus::Pending);
    assert_eq!(*retried.attempts(), 2);
    assert!(*retried.scheduled_for() >= *failed.updated_at());
    assert_eq!(retried.last_error().as_deref(), Some("mailbox full"));

    worker.run_once().await.unwrap();

    let job = utils.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(CALLS.get(), 3);
    assert_eq!(*job.status(), JobStatus::Completed);
    assert_eq!(*job.attempts(), 3);
}

#[tokio::test]
async fn a_retried_job_failing_again_should_stay_failed() {
    static CALLS: StaticCounter = StaticCounter::new();

    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store)
        .define_raw_job("send_offer_email", |_ctx| async move {
            CALLS.increment();
            Err::<(), _>(TaskError::retryable("mailbox full"))
        })
        .init()
        .await
        .unwrap();
    let utils = worker.create_utils();

    let job = utils
        .add_raw_job(
            "send_offer_email",
            json!({}),
            JobSpecBuilder::new().max_attempts(1).build(),
        )
        .await
        .unwrap();

    worker.run_once().await.unwrap();
    utils.retry_job(*job.id()).await.unwrap();
    worker.run_once().await.unwrap();

    let job = utils.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(CALLS.get(), 2);
    assert_eq!(*job.status(), JobStatus::Failed);
    assert_eq!(*job.attempts(), 2);
}

#[tokio::test]
async fn it_should_reject_a_second_retry() {
    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store).init().await.unwrap();
    let utils = worker.create_utils();

    let job = utils
        .add_raw_job("legacy_newsletter", json!({}), JobSpec::default())
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    utils.retry_job(*job.id()).await.unwrap();
    let err = utils.retry_job(*job.id()).await.unwrap_err();

    assert!(
        matches!(
            err,
            OutboxError::NotRetryable {
                status: JobStatus::Pending,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn it_should_reject_retrying_pending_or_completed_jobs() {
    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store)
        .define_raw_job("inbound_lead_alert", |_ctx| async move {
            Ok::<(), TaskError>(())
        })
        .init()
        .await
        .unwrap();
    let utils = worker.create_utils();

    let pending = utils
        .add_raw_job(
            "inbound_lead_alert",
            json!({}),
            JobSpecBuilder::new()
                .scheduled_for(chrono::Utc::now() + chrono::Duration::days(1))
                .build(),
        )
        .await
        .unwrap();
    let completed = utils
        .add_raw_job("inbound_lead_alert", json!({}), JobSpec::default())
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    assert!(matches!(
        utils.retry_job(*pending.id()).await,
        Err(OutboxError::NotRetryable {
            status: JobStatus::Pending,
            ..
        })
    ));
    assert!(matches!(
        utils.retry_job(*completed.id()).await,
        Err(OutboxError::NotRetryable {
            status: JobStatus::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn it_should_report_unknown_jobs() {
    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store).init().await.unwrap();

    let job_id = Uuid::now_v7();
    let err = worker.create_utils().retry_job(job_id).await.unwrap_err();

    assert!(matches!(err, OutboxError::JobNotFound(id) if id == job_id));
}
