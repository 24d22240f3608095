use std::time::Duration;

use outbox_worker::{JobSpec, JobStatus, MemoryJobStore, TaskError};
use serde_json::json;
use tokio::time::timeout;

use crate::helpers::{memory_worker_options, StaticCounter};

mod helpers;

const DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn run_should_process_jobs_until_shutdown() {
    static CALLS: StaticCounter = StaticCounter::new();

    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store)
        .define_raw_job("inbound_lead_alert", |_ctx| async move {
            CALLS.increment();
            Ok::<(), TaskError>(())
        })
        .init()
        .await
        .unwrap();
    let utils = worker.create_utils();
    for i in 0..3 {
        utils
            .add_raw_job("inbound_lead_alert", json!({ "n": i }), JobSpec::default())
            .await
            .unwrap();
    }

    let stop_when_done = async {
        while utils.count_jobs_by_status().await.unwrap().completed < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.request_shutdown();
    };

    timeout(DEADLINE, async { tokio::join!(worker.run(), stop_when_done) })
        .await
        .expect("worker did not stop after shutdown");

    assert_eq!(CALLS.get(), 3);
    assert!(worker.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn handlers_should_be_aborted_after_the_grace_period() {
    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store)
        .shutdown_grace_period(Duration::from_millis(50))
        .define_raw_job("send_offer_email", |_ctx| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), TaskError>(())
        })
        .init()
        .await
        .unwrap();
    let utils = worker.create_utils();
    let job = utils
        .add_raw_job("send_offer_email", json!({}), JobSpec::default())
        .await
        .unwrap();

    let stop_when_started = async {
        while utils.count_jobs_by_status().await.unwrap().processing == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.request_shutdown();
    };

    timeout(DEADLINE, async { tokio::join!(worker.run(), stop_when_started) })
        .await
        .expect("worker did not stop after the grace period");

    let job = utils.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*job.status(), JobStatus::Pending);
    assert_eq!(*job.attempts(), 1);
    assert_eq!(
        job.last_error().as_deref(),
        Some("handler aborted by shutdown")
    );
}

#[tokio::test]
async fn handlers_can_wind_down_on_shutdown() {
    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store)
        .define_raw_job("send_reorder_reminder", |ctx| async move {
            ctx.shutdown_token().cancelled().await;
            Ok::<(), TaskError>(())
        })
        .init()
        .await
        .unwrap();
    let utils = worker.create_utils();
    let job = utils
        .add_raw_job("send_reorder_reminder", json!({}), JobSpec::default())
        .await
        .unwrap();

    let stop_when_started = async {
        while utils.count_jobs_by_status().await.unwrap().processing == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.request_shutdown();
    };

    timeout(DEADLINE, async { tokio::join!(worker.run(), stop_when_started) })
        .await
        .expect("worker did not stop");

    let job = utils.get_job(*job.id()).await.unwrap().unwrap();
    assert_eq!(*job.status(), JobStatus::Completed);
}

#[tokio::test]
async fn run_once_should_return_immediately_without_jobs() {
    let store = MemoryJobStore::new();
    let worker = memory_worker_options(&store).init().await.unwrap();

    timeout(DEADLINE, worker.run_once())
        .await
        .expect("run_once did not return")
        .unwrap();
}
